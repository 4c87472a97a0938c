//! Shared fixtures: a process runner that fakes every external tool.

#![allow(dead_code)]

use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};

use xl_core::{
    Converter, DiskSpace, EncoderSettings, LifecycleEvent, ProcessOutput, ProcessRunner, ToolPaths,
};

type SizeRule = dyn Fn(&str, &[String]) -> Option<u64> + Send + Sync;
type CallHook = dyn Fn(&str, &[String]) + Send + Sync;

/// Writes `rule(program, args)` bytes to the last argument of every encoder
/// call. `None` writes nothing, like an encoder that failed silently.
pub struct FakeRunner {
    rule: Box<SizeRule>,
    hook: Option<Box<CallHook>>,
    jxlinfo_stdout: String,
    pages: u32,
    calls: Mutex<Vec<(String, Vec<String>)>>,
}

impl FakeRunner {
    pub fn new(rule: impl Fn(&str, &[String]) -> Option<u64> + Send + Sync + 'static) -> Self {
        Self {
            rule: Box::new(rule),
            hook: None,
            jxlinfo_stdout: String::new(),
            pages: 1,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn fixed(size: u64) -> Self {
        Self::new(move |_, _| Some(size))
    }

    pub fn with_jxlinfo(mut self, stdout: &str) -> Self {
        self.jxlinfo_stdout = stdout.to_string();
        self
    }

    pub fn with_pages(mut self, pages: u32) -> Self {
        self.pages = pages;
        self
    }

    /// Runs after each call has written its output.
    pub fn on_call(mut self, hook: impl Fn(&str, &[String]) + Send + Sync + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, program: &str) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter(|(p, _)| p == program)
            .map(|(_, args)| args)
            .collect()
    }
}

impl ProcessRunner for FakeRunner {
    fn run(&self, program: &Path, args: &[String]) -> io::Result<ProcessOutput> {
        let name = program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut output = ProcessOutput {
            exit_code: Some(0),
            ..Default::default()
        };

        match name.as_str() {
            "jxlinfo" => output.stdout = self.jxlinfo_stdout.clone(),
            "exiftool" => {}
            "magick" if args.first().map(String::as_str) == Some("identify") => {
                output.stdout = format!("{}\n", self.pages);
            }
            _ => {
                if let Some(size) = (self.rule)(&name, args) {
                    if let Some(dst) = args.last() {
                        std::fs::write(dst, vec![0u8; size as usize])?;
                    }
                }
            }
        }

        self.calls
            .lock()
            .unwrap()
            .push((name.clone(), args.to_vec()));
        if let Some(hook) = &self.hook {
            hook(&name, args);
        }
        Ok(output)
    }
}

/// Reports unknown free space, which always passes the check.
pub struct UnknownDisk;

impl DiskSpace for UnknownDisk {
    fn free_space(&self, _path: &Path) -> Option<u64> {
        None
    }
}

pub fn converter(runner: Arc<FakeRunner>) -> Converter {
    Converter::new(ToolPaths::default(), EncoderSettings::default())
        .with_runner(runner)
        .with_disk(Arc::new(UnknownDisk))
        .with_cores(4)
}

/// Value following `flag` in an argument list.
pub fn arg_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

pub fn write_file(path: &Path, len: usize) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, vec![1u8; len]).unwrap();
}

pub fn files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

pub fn file_len(path: &Path) -> u64 {
    std::fs::metadata(path).unwrap().len()
}

#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl EventLog {
    pub fn sink(&self) -> impl Fn(LifecycleEvent) + Send + Sync + '_ {
        move |e| self.events.lock().unwrap().push(e)
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&LifecycleEvent) -> bool) -> usize {
        self.events().iter().filter(|e| pred(e)).count()
    }
}
