//! Conservative coarse filter that fires before everything except the
//! rate limiter. Matching is case-insensitive substring (`*x*`) on
//! purpose: anything the denylist recognizes is denied at tier 3 and no
//! later rule can win it back.

use chainwatch_protocol::ToolKind;

use crate::config::DenylistCfg;

/// Commands that never escalate a tier-0 trace. Consumed by the tier
/// classifier, not by the denylist.
pub const KNOWN_SAFE_COMMANDS: &[&str] = &[
    "ls", "cat", "whoami", "pwd", "echo", "date", "hostname", "uname", "wc", "head", "tail",
    "which", "env", "printenv", "id",
];

const BUILTIN_COMMANDS: &[&str] = &[
    "rm -rf",
    "rm -fr",
    "mkfs",
    "dd if=",
    ":(){",
    "shutdown",
    "reboot",
    "sudo rm",
    "| sh",
    "| bash",
];

const BUILTIN_URLS: &[&str] = &[
    "169.254.169.254",
    "metadata.google.internal",
    "pastebin.com/raw",
    "transfer.sh",
];

const BUILTIN_FILES: &[&str] = &[
    "/etc/shadow",
    "/etc/sudoers",
    "id_rsa",
    "/dev/sd",
    "/dev/nvme",
    "/boot/",
];

/// A matched denylist pattern, returned as the deny reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenyMatch {
    pub category: &'static str,
    pub pattern: String,
}

#[derive(Debug, Clone)]
pub struct Denylist {
    commands: Vec<String>,
    urls: Vec<String>,
    files: Vec<String>,
}

impl Default for Denylist {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Denylist {
    pub fn builtin() -> Self {
        Self {
            commands: lowered(BUILTIN_COMMANDS.iter().copied()),
            urls: lowered(BUILTIN_URLS.iter().copied()),
            files: lowered(BUILTIN_FILES.iter().copied()),
        }
    }

    /// Built-in set extended with operator-configured patterns.
    pub fn with_config(cfg: &DenylistCfg) -> Self {
        let mut list = Self::builtin();
        list.commands
            .extend(lowered(cfg.commands.iter().map(String::as_str)));
        list.urls.extend(lowered(cfg.urls.iter().map(String::as_str)));
        list.files
            .extend(lowered(cfg.files.iter().map(String::as_str)));
        list
    }

    /// Substring match over every category. The tool's own category is
    /// scanned first, but category order does not change the outcome:
    /// any hit is a tier-3 deny.
    pub fn is_blocked(&self, resource: &str, tool: ToolKind) -> Option<DenyMatch> {
        let needle = resource.to_lowercase();
        for (category, patterns) in self.categories_for(tool) {
            for pattern in patterns {
                if needle.contains(pattern.as_str()) {
                    return Some(DenyMatch {
                        category,
                        pattern: pattern.clone(),
                    });
                }
            }
        }
        None
    }

    fn categories_for(&self, tool: ToolKind) -> [(&'static str, &Vec<String>); 3] {
        let commands = ("commands", &self.commands);
        let urls = ("urls", &self.urls);
        let files = ("files", &self.files);
        match tool {
            ToolKind::Command => [commands, urls, files],
            ToolKind::Http | ToolKind::Browser => [urls, commands, files],
            ToolKind::FileRead | ToolKind::FileWrite | ToolKind::FileDelete => {
                [files, commands, urls]
            }
        }
    }
}

fn lowered<'a>(patterns: impl Iterator<Item = &'a str>) -> Vec<String> {
    patterns
        .map(str::to_lowercase)
        .filter(|p| !p.is_empty())
        .collect()
}
