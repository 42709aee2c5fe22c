//! Scripting bridge to the external media application.
//!
//! [`ScriptHost`] is the only seam that touches the outside process. The
//! production host shells out to `osascript` and `pgrep`; tests substitute a
//! fake that returns canned responses.

use crate::config::PlayerConfig;
use log::debug;
use std::process::{Command, Stdio};
use thiserror::Error;

const OSASCRIPT: &str = "/usr/bin/osascript";

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("failed to launch script runner: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("script failed ({code:?}): {message}")]
    Failed { code: Option<i32>, message: String },
    #[error("script returned non UTF-8 output")]
    Encoding,
}

impl ScriptError {
    pub fn code(&self) -> Option<i32> {
        match self {
            ScriptError::Failed { code, .. } => *code,
            _ => None,
        }
    }
}

/// Textual result of one script execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptOutput(String);

impl ScriptOutput {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn text(&self) -> &str {
        &self.0
    }

    /// `None` for an empty result.
    pub fn non_empty(&self) -> Option<&str> {
        Some(self.0.as_str()).filter(|s| !s.is_empty())
    }

    pub fn as_bool(&self) -> bool {
        self.0.trim().eq_ignore_ascii_case("true")
    }

    /// Accepts a decimal comma, which some locales produce.
    pub fn as_f64(&self) -> Option<f64> {
        let trimmed = self.0.trim();
        trimmed
            .parse::<f64>()
            .or_else(|_| trimmed.replace(',', ".").parse::<f64>())
            .ok()
            .filter(|v| v.is_finite())
    }
}

/// Artwork data as exposed by the player's object model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtworkPayload {
    /// Data already tagged with a known image type.
    Image { bytes: Vec<u8> },
    /// An event descriptor wrapping opaque bytes.
    Descriptor { type_code: String, bytes: Vec<u8> },
    Raw(Vec<u8>),
}

impl ArtworkPayload {
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            ArtworkPayload::Image { bytes } => bytes,
            ArtworkPayload::Descriptor { bytes, .. } => bytes,
            ArtworkPayload::Raw(bytes) => bytes,
        }
    }
}

pub trait ScriptHost: Send + Sync {
    /// Process-table check; must not go through the scripting layer.
    fn is_running(&self, player: &PlayerConfig) -> bool;

    fn execute(&self, source: &str) -> Result<ScriptOutput, ScriptError>;

    /// First artwork object of the current track, read from the object model.
    fn artwork_data(&self, player: &PlayerConfig) -> Result<Option<ArtworkPayload>, ScriptError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct OsaScriptHost;

impl OsaScriptHost {
    pub fn new() -> Self {
        Self
    }

    fn run(&self, args: &[&str]) -> Result<ScriptOutput, ScriptError> {
        let output = Command::new(OSASCRIPT)
            .args(args)
            .stdin(Stdio::null())
            .output()?;

        if !output.status.success() {
            let message = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(ScriptError::Failed {
                code: parse_error_code(&message),
                message,
            });
        }

        let text = String::from_utf8(output.stdout).map_err(|_| ScriptError::Encoding)?;
        Ok(ScriptOutput::new(text.trim_end_matches(['\n', '\r'])))
    }
}

impl ScriptHost for OsaScriptHost {
    fn is_running(&self, player: &PlayerConfig) -> bool {
        Command::new("pgrep")
            .arg("-x")
            .arg(&player.process_name)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    fn execute(&self, source: &str) -> Result<ScriptOutput, ScriptError> {
        self.run(&["-e", source])
    }

    fn artwork_data(&self, player: &PlayerConfig) -> Result<Option<ArtworkPayload>, ScriptError> {
        for property in ["data", "raw data"] {
            let source = format!(
                "tell application \"{}\"\n\
                 if (count of artworks of current track) = 0 then return \"\"\n\
                 return {property} of artwork 1 of current track\n\
                 end tell",
                player.app_name
            );
            match self.run(&["-ss", "-e", &source]) {
                Ok(output) => {
                    if let Some(payload) = parse_data_literal(output.text()) {
                        return Ok(Some(payload));
                    }
                }
                Err(err) => debug!("artwork {property} query failed: {err}"),
            }
        }
        Ok(None)
    }
}

/// Trailing `(-NNNN)` in osascript's stderr.
pub fn parse_error_code(message: &str) -> Option<i32> {
    let end = message.rfind(')')?;
    let start = message[..end].rfind('(')?;
    message[start + 1..end].trim().parse().ok()
}

/// Decodes a `«data XXXXhex»` literal printed by `osascript -ss`.
pub fn parse_data_literal(text: &str) -> Option<ArtworkPayload> {
    let inner = text
        .trim()
        .strip_prefix("\u{ab}data ")?
        .strip_suffix('\u{bb}')?;
    let type_code = inner.get(..4)?;
    let bytes = decode_hex(inner.get(4..)?)?;
    if bytes.is_empty() {
        return None;
    }

    let payload = match type_code {
        "JPEG" | "PNGf" | "TIFF" | "GIFf" | "BMP " | "BMPf" => ArtworkPayload::Image { bytes },
        "tdta" | "rdat" => ArtworkPayload::Descriptor {
            type_code: type_code.to_string(),
            bytes,
        },
        _ => ArtworkPayload::Raw(bytes),
    };
    Some(payload)
}

fn decode_hex(hex: &str) -> Option<Vec<u8>> {
    let hex = hex.trim();
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
        .collect()
}
