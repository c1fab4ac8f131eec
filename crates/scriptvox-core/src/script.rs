//! Dialogue scripts and their validation.
//!
//! A script arrives as a list of [`RawLine`]s (usually JSON) and is turned
//! into a [`Script`] of normalized [`Line`]s by [`Script::validate`]. A
//! validated line always carries exactly one voice reference, a speed in
//! range and a delay within 0..=[`MAX_DELAY_SECONDS`], so later stages never re-check them.

use serde::{Deserialize, Serialize};

use crate::error::{ScriptvoxResult, ValidationError};

/// Slowest accepted speaking rate
pub const MIN_SPEED: f32 = 0.25;

/// Fastest accepted speaking rate
pub const MAX_SPEED: f32 = 2.0;

/// Speaking rate used when a line does not set one
pub const DEFAULT_SPEED: f32 = 1.0;

/// Longest accepted leading delay, in seconds
pub const MAX_DELAY_SECONDS: f32 = 60.0;

/// One weighted voice inside a blend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlendComponent {
    /// Voice identity known to the backend
    pub voice: String,
    /// Weight in [0, 1]
    pub weight: f32,
}

impl BlendComponent {
    /// Create a blend component
    pub fn new<S: Into<String>>(voice: S, weight: f32) -> Self {
        Self {
            voice: voice.into(),
            weight,
        }
    }
}

/// A script line as supplied by a caller, before validation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawLine {
    /// Text to speak
    pub text: String,
    /// Single voice identity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    /// Weighted voice blend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blend_components: Option<Vec<BlendComponent>>,
    /// Seconds of silence before the line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<f32>,
    /// Speaking rate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f32>,
}

impl RawLine {
    /// Line spoken by a single voice
    pub fn with_voice<T: Into<String>, V: Into<String>>(text: T, voice: V) -> Self {
        Self {
            text: text.into(),
            voice: Some(voice.into()),
            ..Self::default()
        }
    }

    /// Line spoken by a blend of voices
    pub fn with_blend<T: Into<String>>(text: T, components: Vec<BlendComponent>) -> Self {
        Self {
            text: text.into(),
            blend_components: Some(components),
            ..Self::default()
        }
    }

    /// Set the leading delay in seconds
    #[must_use]
    pub fn delay(mut self, seconds: f32) -> Self {
        self.delay = Some(seconds);
        self
    }

    /// Set the speaking rate
    #[must_use]
    pub fn speed(mut self, speed: f32) -> Self {
        self.speed = Some(speed);
        self
    }
}

/// Which voice a line is spoken with
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceRef {
    /// A voice identity exposed by the backend
    Identity(String),
    /// A weighted mix of voice identities, in declared order
    Blend(Vec<BlendComponent>),
}

/// A validated script line
#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    text: String,
    voice: VoiceRef,
    delay_seconds: f32,
    speed: f32,
}

impl Line {
    /// Validate and normalize a single raw line.
    ///
    /// An empty `voice` string or an empty blend list counts as absent.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] naming `index` when the voice reference
    /// is ambiguous or missing, a blend weight or the speed is out of range,
    /// or the delay is negative, not finite or above [`MAX_DELAY_SECONDS`].
    pub fn from_raw(index: usize, raw: RawLine) -> Result<Self, ValidationError> {
        let voice = raw.voice.filter(|v| !v.is_empty());
        let blend = raw.blend_components.filter(|b| !b.is_empty());

        let voice = match (voice, blend) {
            (Some(id), None) => VoiceRef::Identity(id),
            (None, Some(components)) => {
                for (component, c) in components.iter().enumerate() {
                    if !(0.0..=1.0).contains(&c.weight) {
                        return Err(ValidationError::WeightOutOfRange {
                            line: index,
                            component,
                            weight: c.weight,
                        });
                    }
                }
                VoiceRef::Blend(components)
            }
            _ => return Err(ValidationError::AmbiguousOrMissingVoice { line: index }),
        };

        let speed = raw.speed.unwrap_or(DEFAULT_SPEED);
        if !(MIN_SPEED..=MAX_SPEED).contains(&speed) {
            return Err(ValidationError::SpeedOutOfRange { line: index, speed });
        }

        let delay_seconds = raw.delay.unwrap_or(0.0);
        if !(0.0..=MAX_DELAY_SECONDS).contains(&delay_seconds) {
            return Err(ValidationError::DelayOutOfRange {
                line: index,
                delay: delay_seconds,
            });
        }

        Ok(Self {
            text: raw.text,
            voice,
            delay_seconds,
            speed,
        })
    }

    /// Text to speak
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Voice reference
    #[must_use]
    pub const fn voice(&self) -> &VoiceRef {
        &self.voice
    }

    /// Seconds of silence emitted before the line
    #[must_use]
    pub const fn delay_seconds(&self) -> f32 {
        self.delay_seconds
    }

    /// Speaking rate
    #[must_use]
    pub const fn speed(&self) -> f32 {
        self.speed
    }
}

/// An ordered, validated dialogue script
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Script {
    lines: Vec<Line>,
}

impl Script {
    /// Validate every raw line in order, stopping at the first failure.
    ///
    /// Pure: never touches a backend.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] encountered.
    pub fn validate<I>(raw: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = RawLine>,
    {
        let lines = raw
            .into_iter()
            .enumerate()
            .map(|(index, line)| Line::from_raw(index, line))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { lines })
    }

    /// Parse a JSON array of lines and validate it.
    ///
    /// # Errors
    ///
    /// Returns a file error for malformed JSON and a validation error for
    /// rejected lines.
    pub fn from_json(json: &str) -> ScriptvoxResult<Self> {
        let raw: Vec<RawLine> = serde_json::from_str(json)?;
        Ok(Self::validate(raw)?)
    }

    /// Lines in declaration order
    #[must_use]
    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    /// Number of lines
    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Whether the script has no lines
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl IntoIterator for Script {
    type Item = Line;
    type IntoIter = std::vec::IntoIter<Line>;

    fn into_iter(self) -> Self::IntoIter {
        self.lines.into_iter()
    }
}
