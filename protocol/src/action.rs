use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use strum_macros::Display;

/// Tool category an action falls under. The category doubles as the
/// rate-limit bucket key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ToolKind {
    Command,
    Http,
    FileRead,
    FileWrite,
    FileDelete,
    Browser,
}

impl ToolKind {
    /// Parse a category name, falling back to `Command` for anything
    /// unrecognized. Unknown input never widens what an action can do.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Self::Http,
            "file_read" => Self::FileRead,
            "file_write" => Self::FileWrite,
            "file_delete" => Self::FileDelete,
            "browser" => Self::Browser,
            _ => Self::Command,
        }
    }

    fn default_operation(self) -> Operation {
        match self {
            Self::Command => Operation::Execute,
            Self::Http => Operation::Get,
            Self::FileRead => Operation::Read,
            Self::FileWrite => Operation::Write,
            Self::FileDelete => Operation::Delete,
            Self::Browser => Operation::Navigate,
        }
    }
}

/// Lower-case operation verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Operation {
    Read,
    Write,
    Execute,
    Get,
    Post,
    Put,
    Delete,
    Navigate,
}

impl Operation {
    /// Case-insensitive parse; unknown verbs coerce to the tool's default
    /// operation rather than erroring out.
    pub fn parse(s: &str, tool: ToolKind) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "read" => Self::Read,
            "write" => Self::Write,
            "execute" => Self::Execute,
            "get" => Self::Get,
            "post" => Self::Post,
            "put" => Self::Put,
            "delete" => Self::Delete,
            "navigate" => Self::Navigate,
            _ => tool.default_operation(),
        }
    }
}

/// Data sensitivity attached to an action. Ordering matters: a trace's
/// `max_sensitivity` only ever goes up.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Sensitivity {
    #[default]
    Low,
    Medium,
    High,
}

impl Sensitivity {
    /// Invalid values coerce to `Low` -- they never escalate.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "medium" => Self::Medium,
            "high" => Self::High,
            _ => Self::Low,
        }
    }

    pub fn rank(self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
        }
    }
}

/// Whether data produced by an action stays inside the deployment or
/// leaves it. A trace that has gone external never comes back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EgressScope {
    #[default]
    Internal,
    External,
}

impl EgressScope {
    /// Invalid values coerce to `Internal`.
    pub fn parse(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("external") {
            Self::External
        } else {
            Self::Internal
        }
    }
}

/// Strongly-typed action metadata. Callers hand us loosely shaped JSON;
/// [`Meta::from_value`] coerces every field defensively so consumers never
/// branch on runtime-tagged values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    #[serde(default)]
    pub sensitivity: Sensitivity,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub rows: u64,
    #[serde(default)]
    pub bytes: u64,
    #[serde(default)]
    pub egress: EgressScope,
    #[serde(default)]
    pub destination: String,
}

impl Meta {
    /// Build a `Meta` from arbitrary JSON. Unknown fields are ignored and
    /// wrong-typed fields fall back to their defaults.
    pub fn from_value(value: &Value) -> Self {
        let mut meta = Self::default();
        let Some(map) = value.as_object() else {
            return meta;
        };
        if let Some(s) = map.get("sensitivity").and_then(Value::as_str) {
            meta.sensitivity = Sensitivity::parse(s);
        }
        if let Some(tags) = map.get("tags").and_then(Value::as_array) {
            meta.tags = tags
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect();
        }
        if let Some(rows) = map.get("rows").and_then(Value::as_u64) {
            meta.rows = rows;
        }
        if let Some(bytes) = map.get("bytes").and_then(Value::as_u64) {
            meta.bytes = bytes;
        }
        if let Some(s) = map.get("egress").and_then(Value::as_str) {
            meta.egress = EgressScope::parse(s);
        }
        if let Some(s) = map.get("destination").and_then(Value::as_str) {
            meta.destination = s.to_string();
        }
        meta
    }
}

/// One intended tool invocation, as seen by the policy pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub tool: ToolKind,
    /// The target: a command line, a URL, or a filesystem path.
    pub resource: String,
    pub operation: Operation,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub meta: Meta,
}

impl Action {
    pub fn new(tool: ToolKind, resource: impl Into<String>, operation: Operation) -> Self {
        Self {
            tool,
            resource: resource.into(),
            operation,
            params: BTreeMap::new(),
            meta: Meta::default(),
        }
    }

    /// A subprocess invocation; `argv` is joined into a single command line.
    pub fn command(argv: &[String]) -> Self {
        Self::new(ToolKind::Command, argv.join(" "), Operation::Execute)
    }

    pub fn http(method: &str, url: impl Into<String>) -> Self {
        let operation = Operation::parse(method, ToolKind::Http);
        Self::new(ToolKind::Http, url, operation)
    }

    pub fn file_read(path: impl Into<String>) -> Self {
        Self::new(ToolKind::FileRead, path, Operation::Read)
    }

    pub fn file_write(path: impl Into<String>) -> Self {
        Self::new(ToolKind::FileWrite, path, Operation::Write)
    }

    pub fn file_delete(path: impl Into<String>) -> Self {
        Self::new(ToolKind::FileDelete, path, Operation::Delete)
    }

    pub fn browser(url: impl Into<String>) -> Self {
        Self::new(ToolKind::Browser, url, Operation::Navigate)
    }

    pub fn with_meta(mut self, meta: Meta) -> Self {
        self.meta = meta;
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_purpose(self, purpose: impl Into<String>) -> Self {
        self.with_param("purpose", purpose)
    }

    /// The declared purpose of the calling agent, or `""` when none was
    /// supplied.
    pub fn purpose(&self) -> &str {
        self.params.get("purpose").map(String::as_str).unwrap_or("")
    }

    /// Stable `tool:prefix` key used to record distinct sources on a trace.
    /// The prefix is the command name, the URL origin, or the parent
    /// directory, depending on the tool category.
    pub fn source_key(&self) -> String {
        let prefix = match self.tool {
            ToolKind::Command => self.resource.split_whitespace().next().unwrap_or(""),
            ToolKind::Http | ToolKind::Browser => url_origin(&self.resource),
            ToolKind::FileRead | ToolKind::FileWrite | ToolKind::FileDelete => {
                match self.resource.rsplit_once('/') {
                    Some((dir, _)) if !dir.is_empty() => dir,
                    _ => self.resource.as_str(),
                }
            }
        };
        format!("{}:{prefix}", self.tool)
    }

    /// Map a model tool call onto an `Action`. The mapping is deterministic
    /// and data-driven: the tool name selects a category, the arguments
    /// supply the resource. Anything unrecognized is treated as a command
    /// so it lands in the most conservative category.
    pub fn from_tool_call(name: &str, args: &serde_json::Map<String, Value>) -> Self {
        let lname = name.to_ascii_lowercase();
        let str_arg = |keys: &[&str]| -> String {
            for key in keys {
                match args.get(*key) {
                    Some(Value::String(s)) => return s.clone(),
                    Some(Value::Array(parts)) => {
                        let words: Vec<String> = parts
                            .iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect();
                        if !words.is_empty() {
                            return words.join(" ");
                        }
                    }
                    _ => {}
                }
            }
            String::new()
        };

        let contains_any = |needles: &[&str]| needles.iter().any(|n| lname.contains(n));

        let mut action = if contains_any(&["command", "shell", "exec", "bash", "terminal"]) {
            Self::new(
                ToolKind::Command,
                str_arg(&["command", "cmd", "script"]),
                Operation::Execute,
            )
        } else if contains_any(&["delete", "remove"]) && args.contains_key("path") {
            Self::file_delete(str_arg(&["path", "file"]))
        } else if contains_any(&["write", "create", "edit"]) && args.contains_key("path") {
            Self::file_write(str_arg(&["path", "file"]))
        } else if contains_any(&["read", "cat", "open"]) && args.contains_key("path") {
            Self::file_read(str_arg(&["path", "file"]))
        } else if contains_any(&["browser", "navigate"]) {
            Self::browser(str_arg(&["url", "uri"]))
        } else if contains_any(&["http", "fetch", "request", "curl"]) {
            let method = str_arg(&["method"]);
            Self::http(&method, str_arg(&["url", "uri"]))
        } else {
            // Unknown tool names are elevated, not free: model them as a
            // command whose resource is the raw call.
            let rendered = Value::Object(args.clone()).to_string();
            Self::new(
                ToolKind::Command,
                format!("{name} {rendered}"),
                Operation::Execute,
            )
        };

        if let Some(meta) = args.get("meta") {
            action.meta = Meta::from_value(meta);
        }
        if let Some(purpose) = args.get("purpose").and_then(Value::as_str) {
            action = action.with_purpose(purpose);
        }
        // Keep the original tool name around; the classifier checks it
        // for self-targeting calls.
        action.with_param("tool_name", name)
    }
}

fn url_origin(url: &str) -> &str {
    let Some(scheme_end) = url.find("://") else {
        return url;
    };
    let rest = &url[scheme_end + 3..];
    match rest.find('/') {
        Some(path_start) => &url[..scheme_end + 3 + path_start],
        None => url,
    }
}
