//! Output file name construction.
//!
//! A [`FileNameTemplate`] is an ordered token sequence whose placeholder
//! tokens are replaced by the forecast hour, date and UTC cycle. The last
//! token is always the file extension.

use crate::constants::{
    DATE_TOKEN, DEFAULT_FCST_FILE_NAME_STRUCTURE, HOUR_TOKEN, INTERMEDIATE_EXTENSION, UTC_TOKEN,
};
use crate::error::{ConversionError, Result};
use serde::{Deserialize, Serialize};

/// Positions of the placeholder tokens within a template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TemplateIndices {
    pub hour: Option<usize>,
    pub date: Option<usize>,
    pub utc: Option<usize>,
}

/// Ordered token sequence describing an output file name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNameTemplate(Vec<String>);

impl Default for FileNameTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_FCST_FILE_NAME_STRUCTURE.iter().copied())
    }
}

impl FileNameTemplate {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(tokens.into_iter().map(Into::into).collect())
    }

    pub fn tokens(&self) -> &[String] {
        &self.0
    }

    /// Leading token, shared by every file produced from this template
    pub fn prefix(&self) -> &str {
        self.0.first().map(String::as_str).unwrap_or_default()
    }

    /// Trailing token
    pub fn extension(&self) -> &str {
        self.0.last().map(String::as_str).unwrap_or_default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.0.len() < 2 {
            return Err(ConversionError::configuration(
                "file name structure needs at least a name token and an extension",
            ));
        }
        if self.indices().hour.is_none() {
            return Err(ConversionError::configuration(format!(
                "file name structure must contain the {} token",
                HOUR_TOKEN
            )));
        }
        Ok(())
    }

    /// Locate the placeholder tokens
    pub fn indices(&self) -> TemplateIndices {
        let find = |token: &str| self.0.iter().position(|t| t == token);
        TemplateIndices {
            hour: find(HOUR_TOKEN),
            date: find(DATE_TOKEN),
            utc: find(UTC_TOKEN),
        }
    }

    /// Resolve the file name for one forecast hour.
    ///
    /// `pre_extension` is inserted before the extension token; pass an
    /// empty string for the final primary file name.
    pub fn name(
        &self,
        indices: &TemplateIndices,
        date: &str,
        hour: u32,
        utc: &str,
        pre_extension: &str,
    ) -> String {
        let tokens = self.fill(indices, date, format!("{:03}", hour), utc, |token| {
            token.to_string()
        });
        Self::join(tokens, pre_extension)
    }

    /// Glob pattern matching the name of every forecast hour of one date
    /// and cycle. Only the hour is wildcarded; literal tokens are escaped.
    pub fn hour_pattern(
        &self,
        indices: &TemplateIndices,
        date: &str,
        utc: &str,
        pre_extension: &str,
    ) -> String {
        let tokens = self.fill(indices, date, "*".to_string(), utc, glob::Pattern::escape);
        Self::join(tokens, &glob::Pattern::escape(pre_extension))
    }

    /// Name of the intermediate exchange-format artifact for a variable
    pub fn intermediate_name(
        &self,
        stash: &str,
        indices: &TemplateIndices,
        date: &str,
        hour: u32,
        utc: &str,
        pre_extension: &str,
    ) -> String {
        let name = self.name(indices, date, hour, utc, pre_extension);
        let stem = name
            .strip_suffix(self.extension())
            .unwrap_or(name.as_str());
        format!("{}_{}{}", stash, stem, INTERMEDIATE_EXTENSION)
    }

    /// Glob pattern matching intermediate artifacts of any variable and
    /// forecast hour of one date and cycle, with or without a pre-extension
    pub fn intermediate_pattern(&self, indices: &TemplateIndices, date: &str, utc: &str) -> String {
        let mut tokens = self.fill(indices, date, "*".to_string(), utc, glob::Pattern::escape);
        tokens.pop();
        format!("*_{}*{}", tokens.concat(), INTERMEDIATE_EXTENSION)
    }

    fn fill<F>(
        &self,
        indices: &TemplateIndices,
        date: &str,
        hour: String,
        utc: &str,
        literal: F,
    ) -> Vec<String>
    where
        F: Fn(&str) -> String,
    {
        let mut tokens: Vec<String> = self.0.iter().map(|token| literal(token)).collect();
        if let Some(i) = indices.hour {
            tokens[i] = hour;
        }
        if let Some(i) = indices.date {
            tokens[i] = literal(date);
        }
        if let Some(i) = indices.utc {
            tokens[i] = literal(&format!("{:0>2}", utc));
        }
        tokens
    }

    fn join(mut tokens: Vec<String>, pre_extension: &str) -> String {
        let extension = tokens.pop().unwrap_or_default();
        let mut name = tokens.concat();
        name.push_str(pre_extension);
        name.push_str(&extension);
        name
    }
}
