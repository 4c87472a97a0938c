mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::{arg_after, converter, files_in, write_file, EventLog, FakeRunner};
use xl_core::{
    BatchError, BatchInput, ConversionParams, DownscaleConfig, LifecycleEvent, NullSink,
    ScaleMode, TargetFormat,
};

#[test]
fn test_counters_reach_item_count_with_failures() {
    let dir = tempfile::tempdir().unwrap();
    let good = dir.path().join("good.png");
    let boom = dir.path().join("boom.png");
    let empty = dir.path().join("empty.png");
    for p in [&good, &boom, &empty] {
        write_file(p, 64);
    }
    let gone = dir.path().join("gone.png");

    let runner = FakeRunner::new(|_, args| {
        let dst = args.last()?;
        if dst.contains("boom") {
            panic!("encoder crashed");
        }
        Some(if dst.contains("empty") { 0 } else { 100 })
    });
    let conv = converter(Arc::new(runner));
    let inputs: Vec<BatchInput> = [&good, &boom, &empty, &gone]
        .iter()
        .map(|p| BatchInput::new(*p, dir.path()))
        .collect();

    let log = EventLog::default();
    let report = conv
        .run(&inputs, ConversionParams::default(), &log.sink())
        .unwrap();

    assert_eq!(report.total, 4);
    assert_eq!(report.processed(), 4);
    assert_eq!(report.converted, 1);
    assert_eq!(report.failed, 3);

    let mut codes: Vec<&str> = report.exceptions.iter().map(|e| e.code.as_str()).collect();
    codes.sort();
    assert_eq!(codes, vec!["C0", "Exception", "F3"]);
    let panicked = report
        .exceptions
        .iter()
        .find(|e| e.code == "Exception")
        .unwrap();
    assert_eq!(panicked.item_name, "boom.png");
    assert_eq!(panicked.message, "encoder crashed");

    assert_eq!(log.count(|e| matches!(e, LifecycleEvent::Started(_))), 4);
    assert_eq!(log.count(|e| matches!(e, LifecycleEvent::Completed(_))), 4);
    assert_eq!(log.count(|e| matches!(e, LifecycleEvent::Exception { .. })), 3);

    // Failed items leave nothing behind.
    assert_eq!(
        files_in(dir.path()),
        vec!["boom.png", "empty.png", "good.jxl", "good.png"]
    );
}

#[test]
fn test_cancel_during_file_size_search_leaves_no_probes() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("big.png");
    write_file(&src, 64);

    let conv = converter(Arc::new(FakeRunner::fixed(1)));
    let token = conv.cancel_token();
    let resizes = Arc::new(AtomicUsize::new(0));
    let seen = resizes.clone();
    let runner = FakeRunner::new(|_, args| {
        let percent: u64 = arg_after(args, "-resize")
            .and_then(|g| g.strip_suffix('%'))
            .and_then(|p| p.parse().ok())
            .unwrap_or(100);
        Some(percent * 100)
    })
    .on_call(move |_, args| {
        if args.iter().any(|a| a == "-resize") && seen.fetch_add(1, Ordering::SeqCst) == 1 {
            token.cancel();
        }
    });
    let conv = conv.with_runner(Arc::new(runner));

    let params = ConversionParams {
        format: TargetFormat::WebP,
        downscale: Some(DownscaleConfig {
            mode: ScaleMode::FileSize { max_kib: 1 },
            resample: "Default".to_string(),
        }),
        ..Default::default()
    };
    let log = EventLog::default();
    let report = conv
        .run(&[BatchInput::new(&src, dir.path())], params, &log.sink())
        .unwrap();

    assert_eq!(resizes.load(Ordering::SeqCst), 2);
    assert_eq!(report.canceled, 1);
    assert_eq!(report.converted, 0);
    assert!(report.exceptions.is_empty());
    assert_eq!(
        log.events(),
        vec![LifecycleEvent::Started(0), LifecycleEvent::Canceled(0)]
    );
    assert_eq!(files_in(dir.path()), vec!["big.png"]);
}

#[test]
fn test_file_size_search_converges() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("big.png");
    write_file(&src, 64);

    // 100 bytes per percent; 3 KiB target lands near 30%.
    let runner = Arc::new(FakeRunner::new(|_, args| {
        let percent: u64 = arg_after(args, "-resize")
            .and_then(|g| g.strip_suffix('%'))
            .and_then(|p| p.parse().ok())
            .unwrap_or(100);
        Some(percent * 100)
    }));
    let params = ConversionParams {
        format: TargetFormat::WebP,
        downscale: Some(DownscaleConfig {
            mode: ScaleMode::FileSize { max_kib: 3 },
            resample: "Lanczos".to_string(),
        }),
        ..Default::default()
    };
    let report = converter(runner.clone())
        .run(&[BatchInput::new(&src, dir.path())], params, &NullSink)
        .unwrap();

    assert_eq!(report.converted, 1, "{:?}", report.exceptions);
    assert_eq!(files_in(dir.path()), vec!["big.png", "big.webp"]);
    let size = std::fs::metadata(dir.path().join("big.webp")).unwrap().len();
    assert!(size <= 3 * 1024);
    assert!(size as f64 >= 3.0 * 1024.0 * 0.95);
    assert!(runner
        .calls_to("magick")
        .iter()
        .all(|args| arg_after(args, "-filter") == Some("Lanczos")));
}

#[test]
fn test_reconstruction_requires_data() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("old.jxl");
    write_file(&src, 64);
    let inputs = [BatchInput::new(&src, dir.path())];

    let runner = Arc::new(FakeRunner::fixed(100).with_jxlinfo("JPEG XL image, 640x480\n"));
    let params = ConversionParams {
        format: TargetFormat::JpegReconstruction,
        jxl_png_fallback: false,
        ..Default::default()
    };
    let report = converter(runner).run(&inputs, params, &NullSink).unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.exceptions[0].code, "S4");
    assert_eq!(files_in(dir.path()), vec!["old.jxl"]);

    let runner = Arc::new(FakeRunner::fixed(100).with_jxlinfo("JPEG XL image, 640x480\n"));
    let params = ConversionParams {
        format: TargetFormat::JpegReconstruction,
        jxl_png_fallback: true,
        ..Default::default()
    };
    let report = converter(runner).run(&inputs, params, &NullSink).unwrap();
    assert_eq!(report.converted, 1);
    assert_eq!(files_in(dir.path()), vec!["old.jxl", "old.png"]);
}

#[test]
fn test_reconstruction_restores_jpeg() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("old.jxl");
    write_file(&src, 64);

    let runner = Arc::new(
        FakeRunner::fixed(100)
            .with_jxlinfo("JPEG XL image\nJPEG bitstream reconstruction data available\n"),
    );
    let params = ConversionParams {
        format: TargetFormat::JpegReconstruction,
        ..Default::default()
    };
    let report = converter(runner.clone())
        .run(&[BatchInput::new(&src, dir.path())], params, &NullSink)
        .unwrap();

    assert_eq!(report.converted, 1);
    assert_eq!(files_in(dir.path()), vec!["old.jpg", "old.jxl"]);
    assert_eq!(runner.calls_to("djxl").len(), 1);
}

#[test]
fn test_proxy_left_behind_fails_finalizing() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("pic.webp");
    write_file(&src, 64);

    // Once the encoder has read the proxy, turn it into a directory so it
    // cannot be removed as a file.
    let runner = Arc::new(FakeRunner::fixed(100).on_call(|program, args| {
        if program == "cjxl" {
            let proxy = &args[args.len() - 2];
            std::fs::remove_file(proxy).unwrap();
            std::fs::create_dir(proxy).unwrap();
        }
    }));
    let report = converter(runner.clone())
        .run(
            &[BatchInput::new(&src, dir.path())],
            ConversionParams::default(),
            &NullSink,
        )
        .unwrap();

    assert_eq!(runner.calls_to("cjxl").len(), 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.exceptions[0].code, "F0");
    assert!(!dir.path().join("pic.jxl").exists());
}

#[test]
fn test_multipage_tiff_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("pages.tiff");
    write_file(&src, 64);

    let runner = Arc::new(FakeRunner::fixed(100).with_pages(3));
    let report = converter(runner)
        .run(
            &[BatchInput::new(&src, dir.path())],
            ConversionParams::default(),
            &NullSink,
        )
        .unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.exceptions[0].code, "CF2");
}

#[test]
fn test_animation_downscale_conflict() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("loop.gif");
    write_file(&src, 64);

    let runner = Arc::new(FakeRunner::fixed(100));
    let params = ConversionParams {
        downscale: Some(DownscaleConfig {
            mode: ScaleMode::Percent(50),
            resample: "Default".to_string(),
        }),
        ..Default::default()
    };
    let report = converter(runner.clone())
        .run(&[BatchInput::new(&src, dir.path())], params, &NullSink)
        .unwrap();
    assert_eq!(report.exceptions[0].code, "CF1");
    assert!(runner.calls().is_empty());
}

#[test]
fn test_empty_batch_rejected() {
    let conv = converter(Arc::new(FakeRunner::fixed(1)));
    let err = conv
        .run(&[], ConversionParams::default(), &NullSink)
        .unwrap_err();
    assert!(matches!(err, BatchError::EmptyList));
}

#[test]
fn test_cancel_is_reset_between_batches() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("a.png");
    write_file(&src, 64);

    let conv = converter(Arc::new(FakeRunner::fixed(100)));
    conv.cancel_token().cancel();
    let report = conv
        .run(
            &[BatchInput::new(&src, dir.path())],
            ConversionParams::default(),
            &NullSink,
        )
        .unwrap();
    assert_eq!(report.converted, 1);
}
