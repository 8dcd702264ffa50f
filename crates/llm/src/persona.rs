use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use snafu::Snafu;

/// Prompt used when a request names no persona at all.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant.";

pub fn system_prompt_for(persona: Option<Persona>) -> &'static str {
    persona.map_or(DEFAULT_SYSTEM_PROMPT, Persona::system_prompt)
}

/// Tone the assistant answers in; selects the system prompt sent upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Persona {
    Professional,
    #[default]
    Casual,
    Sarcastic,
    Motivational,
}

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(display(
    "unknown persona '{raw}', expected one of professional, casual, sarcastic, motivational"
))]
pub struct UnknownPersona {
    pub raw: String,
}

impl Persona {
    pub const ALL: [Self; 4] = [
        Self::Professional,
        Self::Casual,
        Self::Sarcastic,
        Self::Motivational,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Professional => "professional",
            Self::Casual => "casual",
            Self::Sarcastic => "sarcastic",
            Self::Motivational => "motivational",
        }
    }

    /// Exact, lower-case match only. Anything else is rejected rather than mapped
    /// to a fallback prompt.
    pub fn parse(raw: &str) -> Result<Self, UnknownPersona> {
        match raw {
            "professional" => Ok(Self::Professional),
            "casual" => Ok(Self::Casual),
            "sarcastic" => Ok(Self::Sarcastic),
            "motivational" => Ok(Self::Motivational),
            _ => Err(UnknownPersona {
                raw: raw.to_string(),
            }),
        }
    }

    pub const fn system_prompt(self) -> &'static str {
        match self {
            Self::Professional => {
                "You are a professional AI assistant. Respond in a formal, business-like manner."
            }
            Self::Casual => {
                "You are a casual, friendly AI assistant. Respond in a relaxed, conversational tone."
            }
            Self::Sarcastic => {
                "You are a witty, sarcastic AI assistant. Include light humor in your responses."
            }
            Self::Motivational => {
                "You are a motivational AI assistant. Be encouraging and inspiring in your responses."
            }
        }
    }
}

impl fmt::Display for Persona {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl FromStr for Persona {
    type Err = UnknownPersona;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::parse(raw)
    }
}

impl Serialize for Persona {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Persona {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_persona_parses_from_its_own_name() {
        for persona in Persona::ALL {
            assert_eq!(Persona::parse(persona.as_str()), Ok(persona));
        }
    }

    #[test]
    fn unknown_and_miscased_names_are_rejected() {
        assert!(Persona::parse("pirate").is_err());
        assert!(Persona::parse("Casual").is_err());
        assert!(Persona::parse("").is_err());
    }

    #[test]
    fn serde_uses_lowercase_names_and_rejects_unknown() {
        let json = serde_json::to_string(&Persona::Motivational).unwrap();
        assert_eq!(json, "\"motivational\"");

        let parsed: Persona = serde_json::from_str("\"sarcastic\"").unwrap();
        assert_eq!(parsed, Persona::Sarcastic);
        assert!(serde_json::from_str::<Persona>("\"grumpy\"").is_err());
    }
}
