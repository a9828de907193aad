use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::Serialize;

use crate::dispatcher::CounterSnapshot;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultKind {
    Directory,
    File,
    Error,
}

#[derive(Clone, Debug, Serialize)]
pub struct DiscoveryResult {
    pub path: String,
    /// 0 for transport-level errors.
    pub status: u16,
    pub kind: ResultKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub low_confidence: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "text" | "txt" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

pub fn infer_format_from_path(path: &str) -> Option<OutputFormat> {
    let lower = path.trim().to_lowercase();
    if lower.ends_with(".json") {
        return Some(OutputFormat::Json);
    }
    if lower.ends_with(".txt") {
        return Some(OutputFormat::Text);
    }
    None
}

#[derive(Clone, Debug, Serialize)]
pub struct ScanReport {
    pub results: Vec<DiscoveryResult>,
    pub counters: CounterSnapshot,
    pub elapsed_seconds: f64,
}

impl ScanReport {
    pub fn directories_by_status(&self) -> BTreeMap<u16, Vec<&DiscoveryResult>> {
        self.group_by_status(ResultKind::Directory)
    }

    pub fn files_by_status(&self) -> BTreeMap<u16, Vec<&DiscoveryResult>> {
        self.group_by_status(ResultKind::File)
    }

    fn group_by_status(&self, kind: ResultKind) -> BTreeMap<u16, Vec<&DiscoveryResult>> {
        let mut groups: BTreeMap<u16, Vec<&DiscoveryResult>> = BTreeMap::new();
        for result in self.results.iter().filter(|r| r.kind == kind) {
            groups.entry(result.status).or_default().push(result);
        }
        groups
    }

    pub fn errors_by_message(&self) -> BTreeMap<String, Vec<&DiscoveryResult>> {
        let mut groups: BTreeMap<String, Vec<&DiscoveryResult>> = BTreeMap::new();
        for result in self.results.iter().filter(|r| r.kind == ResultKind::Error) {
            let key = result.message.clone().unwrap_or_default();
            groups.entry(key).or_default().push(result);
        }
        groups
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();

        let dirs = self.directories_by_status();
        if !dirs.is_empty() {
            let _ = writeln!(out, "Directories found:");
            for (status, results) in dirs {
                for result in results {
                    let flag = if result.low_confidence { " (?)" } else { "" };
                    let _ = writeln!(out, "  {status}  {}{flag}", result.path);
                }
            }
            let _ = writeln!(out);
        }

        let files = self.files_by_status();
        if !files.is_empty() {
            let _ = writeln!(out, "Files found:");
            for (status, results) in files {
                for result in results {
                    let flag = if result.low_confidence { " (?)" } else { "" };
                    let _ = writeln!(out, "  {status}  {}{flag}", result.path);
                }
            }
            let _ = writeln!(out);
        }

        let errors = self.errors_by_message();
        if !errors.is_empty() {
            let _ = writeln!(out, "Errors:");
            for (message, results) in errors {
                let _ = writeln!(out, "  {message}");
                for result in results {
                    let _ = writeln!(out, "    {}", result.path);
                }
            }
            let _ = writeln!(out);
        }

        let _ = writeln!(
            out,
            "{} requests in {:.1}s, {} dirs queued for recursion, {} base cases",
            self.counters.total_done,
            self.elapsed_seconds,
            self.counters.dirs_found,
            self.counters.base_cases
        );
        out
    }

    pub fn render_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn render(&self, format: OutputFormat) -> Result<String, serde_json::Error> {
        match format {
            OutputFormat::Text => Ok(self.render_text()),
            OutputFormat::Json => self.render_json(),
        }
    }
}
