use colored::*;
use serde::Serialize;
use std::io::{self, Write};
use std::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy)]
pub enum Level {
    Info,
    Success,
    Warn,
    Error,
    Debug,
}

impl Level {
    fn icon(self) -> char {
        match self {
            Level::Info => '•',
            Level::Success => '✓',
            Level::Warn => '!',
            Level::Error => '✗',
            Level::Debug => '·',
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Level::Info => "info",
            Level::Success => "success",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Debug => "debug",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Renderer {
    pub format: OutputFormat,
    pub color: bool,
    pub verbose: bool,
}

static RENDERER: RwLock<Renderer> = RwLock::new(Renderer {
    format: OutputFormat::Text,
    color: true,
    verbose: false,
});

pub fn init(format: OutputFormat, color: bool, verbose: bool) {
    if let Ok(mut r) = RENDERER.write() {
        r.format = format;
        r.color = color;
        r.verbose = verbose;
    }
}

#[derive(Serialize)]
struct Event<'a> {
    level: &'a str,
    code: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
}

fn colorize(level: Level, s: &str, enable: bool) -> String {
    if !enable {
        return s.to_string();
    }
    match level {
        Level::Info => s.normal().to_string(),
        Level::Success => s.green().bold().to_string(),
        Level::Warn => s.yellow().bold().to_string(),
        Level::Error => s.red().bold().to_string(),
        Level::Debug => s.cyan().to_string(),
    }
}

pub fn emit(level: Level, code: &str, message: &str, data: Option<serde_json::Value>) {
    let r = *RENDERER.read().expect("renderer poisoned");
    if matches!(level, Level::Debug) && !r.verbose {
        return;
    }
    let mut out: Box<dyn Write> = match level {
        Level::Error | Level::Warn => Box::new(io::stderr()),
        _ => Box::new(io::stdout()),
    };
    match r.format {
        OutputFormat::Text => {
            let line = colorize(level, &format!("{} {}", level.icon(), message), r.color);
            let _ = writeln!(out, "{}", line);
        }
        OutputFormat::Json => {
            let ev = Event {
                level: level.as_str(),
                code,
                message,
                data,
            };
            let s = serde_json::to_string(&ev).expect("serialize event");
            let _ = writeln!(out, "{}", s);
        }
    }
}

// Convenience helpers
pub fn info(code: &str, message: &str) {
    emit(Level::Info, code, message, None)
}
pub fn success(code: &str, message: &str) {
    emit(Level::Success, code, message, None)
}
pub fn success_with_data(code: &str, message: &str, data: serde_json::Value) {
    emit(Level::Success, code, message, Some(data))
}
pub fn warn(code: &str, message: &str) {
    emit(Level::Warn, code, message, None)
}
pub fn error(code: &str, message: &str) {
    emit(Level::Error, code, message, None)
}
pub fn debug(code: &str, message: &str) {
    emit(Level::Debug, code, message, None)
}

pub fn get_output_format() -> OutputFormat {
    RENDERER.read().expect("renderer poisoned").format
}

pub fn separator() {
    let r = *RENDERER.read().expect("renderer poisoned");
    if matches!(r.format, OutputFormat::Json) {
        return;
    }
    println!("{}", "━".repeat(60));
}

pub mod prelude {
    pub use super::{
        Level, OutputFormat, debug, emit, error, get_output_format, info, separator, success,
        success_with_data, warn,
    };
}
