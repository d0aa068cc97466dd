use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::error::ValidationError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Javascript,
    C,
    Cpp,
    Java,
    Sql,
}

impl Language {
    pub const ALL: [Language; 6] = [
        Language::Python,
        Language::Javascript,
        Language::C,
        Language::Cpp,
        Language::Java,
        Language::Sql,
    ];

    pub fn from_key(key: &str) -> Result<Self, ValidationError> {
        match key {
            "python" => Ok(Language::Python),
            "javascript" => Ok(Language::Javascript),
            "c" => Ok(Language::C),
            "cpp" => Ok(Language::Cpp),
            "java" => Ok(Language::Java),
            "sql" => Ok(Language::Sql),
            _ => Err(ValidationError::UnsupportedLanguage),
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Javascript => "javascript",
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Java => "java",
            Language::Sql => "sql",
        }
    }

    /// Name the container entrypoint expects the submission under.
    pub fn filename(self) -> SourceFilename {
        SourceFilename(match self {
            Language::Python => "code.py",
            Language::Javascript => "code.js",
            Language::C => "code.c",
            Language::Cpp => "code.cpp",
            Language::Java => "Main.java",
            Language::Sql => "query.sql",
        })
    }

    pub fn default_image(self) -> &'static str {
        match self {
            Language::Python => "code-runner-python",
            Language::Javascript => "code-runner-javascript",
            Language::C => "code-runner-c",
            Language::Cpp => "code-runner-cpp",
            Language::Java => "code-runner-java",
            Language::Sql => "code-runner-sql",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// A source filename that can only come from the registry, never from a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SourceFilename(&'static str);

impl SourceFilename {
    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct LanguageDescriptor {
    #[serde(rename = "key")]
    pub language: Language,
    pub filename: SourceFilename,
    pub image: String,
}

/// Static language table with per-deployment image names.
#[derive(Clone, Debug)]
pub struct Registry {
    images: BTreeMap<Language, String>,
}

impl Registry {
    /// `overrides` must already be validated: every key is a supported language.
    pub fn new(overrides: &BTreeMap<String, String>) -> Self {
        let images = Language::ALL
            .iter()
            .map(|&language| {
                let image = overrides
                    .get(language.key())
                    .cloned()
                    .unwrap_or_else(|| language.default_image().to_string());
                (language, image)
            })
            .collect();
        Self { images }
    }

    pub fn lookup(&self, key: &str) -> Result<LanguageDescriptor, ValidationError> {
        let language = Language::from_key(key)?;
        Ok(self.descriptor(language))
    }

    pub fn descriptors(&self) -> Vec<LanguageDescriptor> {
        Language::ALL.iter().map(|&language| self.descriptor(language)).collect()
    }

    fn descriptor(&self, language: Language) -> LanguageDescriptor {
        let image = self
            .images
            .get(&language)
            .cloned()
            .unwrap_or_else(|| language.default_image().to_string());
        LanguageDescriptor {
            language,
            filename: language.filename(),
            image,
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(&BTreeMap::new())
    }
}
