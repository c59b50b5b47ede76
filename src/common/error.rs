/*
 * This file is part of the Insights Analytics backend.
 *
 * Copyright (C) 2025 Insights Analytics contributors
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use sqlx::Error;
use thiserror::Error;

/// Errors raised by the database layer: the per-tenant session router, the
/// repositories and the provisioner.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("InvalidInput error: {0}")]
    InvalidInput(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl RepositoryError {
    pub fn is_unique_violation(&self) -> bool {
        if let RepositoryError::Database(sqlxe) = self
            && let Error::Database(database_error) = sqlxe
            && database_error.is_unique_violation()
        {
            return true;
        }
        false
    }

    /// True for PostgreSQL 42P04 ("database already exists"). Racing
    /// provisioners hit this and must treat it as success.
    pub fn is_duplicate_database(&self) -> bool {
        if let RepositoryError::Database(Error::Database(database_error)) = self
            && database_error.code().as_deref() == Some("42P04")
        {
            return true;
        }
        false
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Errors raised by the extractor clients (warehouse and SFTP).
///
/// The `Display` text of each variant carries the words the job engine's
/// message classifier scans for.
#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("Network/DNS error: {0}")]
    Transport(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("File not found: {0}")]
    SourceMissing(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("{0}")]
    Other(String),
}

impl ExtractorError {
    /// Short kind name, used when the classified error message forwards the
    /// original error (`"... - <ErrorKind>: <message>"`).
    pub fn kind_name(&self) -> &'static str {
        match self {
            ExtractorError::Transport(_) => "TransportError",
            ExtractorError::Auth(_) => "AuthenticationError",
            ExtractorError::SourceMissing(_) => "SourceMissingError",
            ExtractorError::Parse(_) => "ParseError",
            ExtractorError::Other(_) => "Error",
        }
    }
}

pub type ExtractorResult<T> = Result<T, ExtractorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extractor_error_display_carries_classifier_markers() {
        let e = ExtractorError::Transport("nodename nor servname provided".into());
        assert!(e.to_string().contains("Network/DNS"));
        let e = ExtractorError::Auth("invalid_grant".into());
        assert!(e.to_string().to_lowercase().contains("authentication"));
        let e = ExtractorError::SourceMissing("Locations_List.xlsx".into());
        assert!(e.to_string().to_lowercase().contains("not found"));
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(
            ExtractorError::Parse("bad sheet".into()).kind_name(),
            "ParseError"
        );
        assert_eq!(ExtractorError::Other("boom".into()).kind_name(), "Error");
    }
}
