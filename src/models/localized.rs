use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{PgDb, UnknownVariant};

/// One of the three fixed language variants every template field carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Zh,
    Es,
}

impl Language {
    pub const ALL: [Language; 3] = [Language::En, Language::Zh, Language::Es];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Zh => "zh",
            Language::Es => "es",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "en" => Ok(Language::En),
            "zh" => Ok(Language::Zh),
            "es" => Ok(Language::Es),
            other => Err(UnknownVariant {
                kind: "language",
                value: other.to_string(),
            }),
        }
    }
}

impl sqlx::Type<PgDb> for Language {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for Language {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        super::decode_text(value)
    }
}

/// A text field stored once per supported language.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalizedText {
    #[serde(default)]
    pub en: String,
    #[serde(default)]
    pub zh: String,
    #[serde(default)]
    pub es: String,
}

impl LocalizedText {
    /// Text for `lang`, falling back to the default language when that variant is blank.
    pub fn get(&self, lang: Language) -> &str {
        let text = match lang {
            Language::En => &self.en,
            Language::Zh => &self.zh,
            Language::Es => &self.es,
        };
        if text.trim().is_empty() { &self.en } else { text }
    }

    pub fn is_blank(&self) -> bool {
        Language::ALL.iter().all(|lang| self.get(*lang).trim().is_empty())
    }
}
