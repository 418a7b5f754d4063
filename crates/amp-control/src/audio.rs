//! Host audio access.
//!
//! The controller only needs three things from the OS: whether anything is
//! playing, and read/write access to the system volume (0..=100).

use std::process::Command;

/// OS audio capability used by the controller.
pub trait AudioSource {
    fn is_playing(&mut self) -> bool;
    /// Current system volume in `0..=100`.
    fn volume(&mut self) -> i32;
    /// Set system volume; values are clamped to `0..=100`.
    fn set_volume(&mut self, value: i32);
}

/// Placeholder substituted with the target volume in `set_volume` commands.
pub const VOLUME_PLACEHOLDER: &str = "{volume}";

/// External commands used to query and drive the system mixer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioCommands {
    /// Exit status 0 means audio is playing.
    pub is_playing: Vec<String>,
    /// Prints the current volume; the first `NN%` (or plain integer) is used.
    pub get_volume: Vec<String>,
    /// Sets the volume; `{volume}` is replaced in every argument.
    pub set_volume: Vec<String>,
}

impl Default for AudioCommands {
    /// PulseAudio / PipeWire defaults via `pactl`.
    fn default() -> Self {
        Self {
            is_playing: shell("pactl list short sinks | grep -q RUNNING"),
            get_volume: vec![
                "pactl".to_string(),
                "get-sink-volume".to_string(),
                "@DEFAULT_SINK@".to_string(),
            ],
            set_volume: vec![
                "pactl".to_string(),
                "set-sink-volume".to_string(),
                "@DEFAULT_SINK@".to_string(),
                format!("{VOLUME_PLACEHOLDER}%"),
            ],
        }
    }
}

fn shell(script: &str) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), script.to_string()]
}

/// [`AudioSource`] that shells out to configurable commands.
///
/// Command failures are logged and degrade to "not playing", the last known
/// volume, or a skipped write.
pub struct CommandAudioSource {
    commands: AudioCommands,
    last_volume: i32,
}

impl CommandAudioSource {
    pub fn new(commands: AudioCommands) -> Self {
        Self {
            commands,
            last_volume: 0,
        }
    }
}

impl AudioSource for CommandAudioSource {
    fn is_playing(&mut self) -> bool {
        let Some((program, args)) = self.commands.is_playing.split_first() else {
            return false;
        };
        match Command::new(program).args(args).output() {
            Ok(out) => out.status.success(),
            Err(e) => {
                tracing::warn!(program = %program, error = %e, "audio: is_playing command failed");
                false
            }
        }
    }

    fn volume(&mut self) -> i32 {
        let Some((program, args)) = self.commands.get_volume.split_first() else {
            return self.last_volume;
        };
        let parsed = Command::new(program)
            .args(args)
            .output()
            .ok()
            .filter(|out| out.status.success())
            .and_then(|out| parse_volume(&String::from_utf8_lossy(&out.stdout)));
        match parsed {
            Some(v) => {
                self.last_volume = v;
                v
            }
            None => {
                tracing::warn!(
                    program = %program,
                    last_volume = self.last_volume,
                    "audio: volume query failed"
                );
                self.last_volume
            }
        }
    }

    fn set_volume(&mut self, value: i32) {
        let value = value.clamp(0, 100);
        let argv = render_set_volume(&self.commands.set_volume, value);
        let Some((program, args)) = argv.split_first() else {
            return;
        };
        match Command::new(program).args(args).status() {
            Ok(status) if status.success() => self.last_volume = value,
            Ok(status) => {
                tracing::warn!(program = %program, code = ?status.code(), "audio: set volume failed")
            }
            Err(e) => tracing::warn!(program = %program, error = %e, "audio: set volume failed"),
        }
    }
}

/// Volume from command output: the first `NN%` token if present, otherwise
/// the first integer. Clamped to `0..=100`.
fn parse_volume(output: &str) -> Option<i32> {
    let mut first = None;
    let mut chars = output.char_indices().peekable();
    while let Some((start, c)) = chars.next() {
        if !c.is_ascii_digit() {
            continue;
        }
        let mut end = start + c.len_utf8();
        while let Some(&(i, d)) = chars.peek() {
            if !d.is_ascii_digit() {
                break;
            }
            end = i + d.len_utf8();
            chars.next();
        }
        let Ok(value) = output[start..end].parse::<i64>() else {
            continue;
        };
        let value = value.clamp(0, 100) as i32;
        if output[end..].starts_with('%') {
            return Some(value);
        }
        first.get_or_insert(value);
    }
    first
}

fn render_set_volume(template: &[String], value: i32) -> Vec<String> {
    let value = value.to_string();
    template
        .iter()
        .map(|arg| arg.replace(VOLUME_PLACEHOLDER, &value))
        .collect()
}
