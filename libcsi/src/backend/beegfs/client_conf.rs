//! `beegfs-client.conf` templates.
//!
//! The file is a flat list of `key = value` lines with `#` comments.  The
//! plugin only ever changes keys the template already defines; comments,
//! ordering and untouched lines are written back verbatim.

use std::fmt;

use crate::error::CsiError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    /// Comment, blank or anything else that is passed through untouched.
    Verbatim(String),
    Entry { key: String, value: String },
}

/// A parsed `beegfs-client.conf`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConf {
    lines: Vec<Line>,
}

impl ClientConf {
    /// Parse the content of a template file.
    pub fn parse(contents: &str) -> Self {
        let lines = contents
            .lines()
            .map(|raw| {
                let trimmed = raw.trim();
                if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
                    return Line::Verbatim(raw.to_owned());
                }
                match trimmed.split_once('=') {
                    Some((key, value)) if !key.trim().is_empty() => Line::Entry {
                        key: key.trim().to_owned(),
                        value: value.trim().to_owned(),
                    },
                    _ => Line::Verbatim(raw.to_owned()),
                }
            })
            .collect();
        Self { lines }
    }

    /// The value of `key`, if the template defines it.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.lines.iter().rev().find_map(|line| match line {
            Line::Entry { key: k, value } if k == key => Some(value.as_str()),
            _ => None,
        })
    }

    /// Whether the template defines `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Overwrite an existing key.  Unknown keys are rejected.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), CsiError> {
        let mut found = false;
        for line in &mut self.lines {
            if let Line::Entry { key: k, value: v } = line
                && k == key
            {
                *v = value.to_owned();
                found = true;
            }
        }
        if found {
            Ok(())
        } else {
            Err(CsiError::InvalidConfig(format!(
                "{key} not in template beegfs-client.conf file"
            )))
        }
    }
}

impl fmt::Display for ClientConf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            match line {
                Line::Verbatim(raw) => writeln!(f, "{raw}")?,
                Line::Entry { key, value } => writeln!(f, "{key} = {value}")?,
            }
        }
        Ok(())
    }
}
