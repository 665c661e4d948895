//! Native service descriptors, rendered as pure functions of their inputs.
//!
//! Nothing in this module touches the filesystem or a supervisor; backends
//! decide where the rendered bytes go.
use quick_xml::{
    Reader, Writer,
    events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event},
};
use std::{fmt::Write as _, path::PathBuf, time::Duration};

use crate::{
    config::ManagerConfig,
    constants::{
        LAUNCHD_THROTTLE_INTERVAL, RECOVERY_DELAYS, RECOVERY_RESET_PERIOD,
        SYSTEMD_RESTART_SEC,
    },
    error::ServiceError,
    install::InstallSpec,
};

const PLIST_DOCTYPE: &str = r#"plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd""#;

/// Full relay invocation: program followed by its arguments.
pub fn relay_command(program: &std::path::Path, spec: &InstallSpec) -> Vec<String> {
    let mut command = vec![program.display().to_string()];
    command.extend(spec.relay_args());
    command
}

fn working_directory(program: &std::path::Path) -> PathBuf {
    program
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/"))
}

// ============================================================================
// systemd
// ============================================================================

/// Inputs of a systemd unit file.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemdUnit {
    /// `Description=` line.
    pub description: String,
    /// Program and arguments for `ExecStart=`.
    pub exec_start: Vec<String>,
    /// `WorkingDirectory=`.
    pub working_directory: PathBuf,
    /// Only path the relay may write to.
    pub data_dir: PathBuf,
    /// Account the relay runs as.
    pub user: String,
    /// Group the relay runs as.
    pub group: String,
}

impl SystemdUnit {
    /// Unit for `spec` running `program`.
    pub fn new(config: &ManagerConfig, program: &std::path::Path, spec: &InstallSpec) -> Self {
        Self {
            description: config.description.clone(),
            exec_start: relay_command(program, spec),
            working_directory: working_directory(program),
            data_dir: spec.data_dir.clone(),
            user: "root".to_string(),
            group: "root".to_string(),
        }
    }

    /// Renders the unit file.
    pub fn render(&self) -> String {
        let exec_start = self
            .exec_start
            .iter()
            .map(|arg| quote_systemd_arg(arg))
            .collect::<Vec<_>>()
            .join(" ");

        let mut unit = String::new();
        let _ = write!(
            unit,
            "[Unit]
Description={description}
After=network-online.target
Wants=network-online.target

[Service]
Type=simple
ExecStart={exec_start}
Restart=always
RestartSec={restart_sec}
User={user}
Group={group}
WorkingDirectory={working_directory}

# Hardening
NoNewPrivileges=true
ProtectSystem=strict
ProtectHome=read-only
ReadWritePaths={data_dir}
PrivateTmp=true

[Install]
WantedBy=multi-user.target
",
            description = self.description,
            restart_sec = SYSTEMD_RESTART_SEC,
            user = self.user,
            group = self.group,
            working_directory = escape_specifiers(&self.working_directory.display().to_string()),
            data_dir = quote_systemd_arg(&self.data_dir.display().to_string()),
        );
        unit
    }
}

/// Escapes `%` specifiers in a directive systemd reads verbatim, such as
/// `WorkingDirectory=`, which must not be quoted.
fn escape_specifiers(value: &str) -> String {
    value.replace('%', "%%")
}

/// Quotes a single `ExecStart=` word, escaping systemd specifiers.
fn quote_systemd_arg(arg: &str) -> String {
    let escaped = escape_specifiers(arg).replace('$', "$$");
    let needs_quotes = escaped.is_empty()
        || escaped
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '"' | '\'' | '\\' | ';'));
    if !needs_quotes {
        return escaped;
    }

    let mut quoted = String::with_capacity(escaped.len() + 2);
    quoted.push('"');
    for c in escaped.chars() {
        if matches!(c, '"' | '\\') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Recovers the `ExecStart=` words from a unit file written by [`SystemdUnit`].
pub fn systemd_exec_args(unit: &str) -> Option<Vec<String>> {
    let line = unit
        .lines()
        .find_map(|line| line.trim().strip_prefix("ExecStart="))?;

    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quoted = false;
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => {
                quoted = !quoted;
                in_word = true;
            }
            '\\' if quoted => current.extend(chars.next()),
            c if c.is_whitespace() && !quoted => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if in_word {
        words.push(current);
    }

    Some(
        words
            .into_iter()
            .map(|word| word.replace("%%", "%").replace("$$", "$"))
            .collect(),
    )
}

// ============================================================================
// launchd
// ============================================================================

/// Inputs of a launchd property list.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchdPlist {
    /// Job label.
    pub label: String,
    /// Program and arguments.
    pub program_arguments: Vec<String>,
    /// Working directory of the job.
    pub working_directory: PathBuf,
    /// File receiving both stdout and stderr.
    pub log_path: PathBuf,
    /// Minimum seconds between respawns.
    pub throttle_interval: u64,
}

impl LaunchdPlist {
    /// Property list for `spec` running `program`.
    pub fn new(config: &ManagerConfig, program: &std::path::Path, spec: &InstallSpec) -> Self {
        Self {
            label: config.launchd_label.clone(),
            program_arguments: relay_command(program, spec),
            working_directory: working_directory(program),
            log_path: config.log_path.clone(),
            throttle_interval: LAUNCHD_THROTTLE_INTERVAL,
        }
    }

    /// Renders the property list as XML.
    pub fn render(&self) -> Result<String, ServiceError> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 4);
        let working_directory = self.working_directory.display().to_string();
        let log_path = self.log_path.display().to_string();
        let throttle = self.throttle_interval.to_string();

        let mut events = vec![
            Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)),
            Event::DocType(BytesText::from_escaped(PLIST_DOCTYPE)),
            Event::Start(BytesStart::new("plist").with_attributes([("version", "1.0")])),
            Event::Start(BytesStart::new("dict")),
        ];
        push_entry(&mut events, "Label", "string", &self.label);
        push_key(&mut events, "ProgramArguments");
        events.push(Event::Start(BytesStart::new("array")));
        for arg in &self.program_arguments {
            push_value(&mut events, "string", arg);
        }
        events.push(Event::End(BytesEnd::new("array")));
        push_key(&mut events, "RunAtLoad");
        events.push(Event::Empty(BytesStart::new("true")));
        push_key(&mut events, "KeepAlive");
        events.push(Event::Empty(BytesStart::new("true")));
        push_entry(&mut events, "ThrottleInterval", "integer", &throttle);
        push_entry(&mut events, "WorkingDirectory", "string", &working_directory);
        push_entry(&mut events, "StandardOutPath", "string", &log_path);
        push_entry(&mut events, "StandardErrorPath", "string", &log_path);
        events.push(Event::End(BytesEnd::new("dict")));
        events.push(Event::End(BytesEnd::new("plist")));

        for event in events {
            writer
                .write_event(event)
                .map_err(|err| ServiceError::backend("render property list", err))?;
        }

        let mut xml = String::from_utf8(writer.into_inner())
            .map_err(|err| ServiceError::backend("render property list", err))?;
        xml.push('\n');
        Ok(xml)
    }
}

fn push_key<'a>(events: &mut Vec<Event<'a>>, key: &'a str) {
    push_value(events, "key", key);
}

fn push_value<'a>(events: &mut Vec<Event<'a>>, tag: &'a str, value: &'a str) {
    events.push(Event::Start(BytesStart::new(tag)));
    events.push(Event::Text(BytesText::new(value)));
    events.push(Event::End(BytesEnd::new(tag)));
}

fn push_entry<'a>(events: &mut Vec<Event<'a>>, key: &'a str, tag: &'a str, value: &'a str) {
    push_key(events, key);
    push_value(events, tag, value);
}

/// Recovers `ProgramArguments` from a property list.
pub fn launchd_program_arguments(plist: &str) -> Option<Vec<String>> {
    let mut reader = Reader::from_str(plist);
    let mut last_key = String::new();
    let mut in_key = false;
    let mut in_args = false;
    let mut args = Vec::new();

    loop {
        match reader.read_event().ok()? {
            Event::Start(start) => match start.name().as_ref() {
                b"key" => in_key = true,
                b"array" if last_key == "ProgramArguments" => in_args = true,
                _ => {}
            },
            Event::Text(text) => {
                let value = text.unescape().ok()?;
                if in_key {
                    last_key = value.trim().to_string();
                } else if in_args && !value.trim().is_empty() {
                    args.push(value.into_owned());
                }
            }
            Event::End(end) => match end.name().as_ref() {
                b"key" => in_key = false,
                b"array" if in_args => return Some(args),
                _ => {}
            },
            Event::Eof => return None,
            _ => {}
        }
    }
}

// ============================================================================
// Windows service control manager
// ============================================================================

/// Everything registered with the Windows service control manager.
#[derive(Debug, Clone, PartialEq)]
pub struct ScmRegistration {
    /// Service key name.
    pub name: String,
    /// Console display name.
    pub display_name: String,
    /// Service description.
    pub description: String,
    /// Relay executable.
    pub executable: PathBuf,
    /// Relay arguments.
    pub arguments: Vec<String>,
    /// Restart delays applied after the first, second, and later failures.
    pub recovery_delays: Vec<Duration>,
    /// Failure-count reset window.
    pub reset_period: Duration,
}

impl ScmRegistration {
    /// Registration for `spec` running `program`.
    pub fn new(config: &ManagerConfig, program: &std::path::Path, spec: &InstallSpec) -> Self {
        Self {
            name: config.service_name.clone(),
            display_name: config.display_name.clone(),
            description: config.description.clone(),
            executable: program.to_path_buf(),
            arguments: spec.relay_args(),
            recovery_delays: RECOVERY_DELAYS.to_vec(),
            reset_period: RECOVERY_RESET_PERIOD,
        }
    }
}
