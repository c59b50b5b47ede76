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

use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use calamine::{Data, Range, Reader, open_workbook_auto};
use ssh2::Session;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::clients::LocationExtractor;
use crate::common::error::{ExtractorError, ExtractorResult};
use crate::manager::tenants::repository::SftpConfig;
use crate::tenant::locations::model::LocationRecord;

/// Seconds allowed for each of TCP connect, banner exchange, authentication
/// and channel operations.
const SFTP_TIMEOUT_SECS: u64 = 30;

/// Locations extractor over SFTP.
///
/// Stateless: every call opens a fresh SSH + SFTP session, downloads the
/// configured spreadsheet to a temporary file and closes the session. The
/// temporary file is removed on every exit path.
pub struct SftpClient {
    config: SftpConfig,
}

impl SftpClient {
    pub fn new(config: SftpConfig) -> ExtractorResult<Self> {
        info!("Initialized SFTP client for {}:{}", config.host, config.port);
        Ok(Self { config })
    }
}

#[async_trait]
impl LocationExtractor for SftpClient {
    async fn get_locations(&self) -> ExtractorResult<Vec<LocationRecord>> {
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || fetch_locations(&config))
            .await
            .map_err(|e| ExtractorError::Other(format!("SFTP worker failed: {e}")))?
    }
}

fn fetch_locations(config: &SftpConfig) -> ExtractorResult<Vec<LocationRecord>> {
    // NamedTempFile unlinks on drop, which covers the error paths too.
    let downloaded = download_file(config, &config.locations_file)?;
    parse_locations_workbook(downloaded.path())
}

fn connect(config: &SftpConfig) -> ExtractorResult<Session> {
    let address = (config.host.as_str(), config.port)
        .to_socket_addrs()
        .map_err(|e| ExtractorError::Transport(format!("{}: {e}", config.host)))?
        .next()
        .ok_or_else(|| {
            ExtractorError::Transport(format!("{}: no addresses resolved", config.host))
        })?;
    info!("Connecting to SFTP: {}", config.host);
    let stream = TcpStream::connect_timeout(&address, Duration::from_secs(SFTP_TIMEOUT_SECS))
        .map_err(|e| ExtractorError::Transport(format!("{}: {e}", config.host)))?;

    let mut session = Session::new().map_err(|e| ExtractorError::Other(e.to_string()))?;
    // One wall-clock budget shared by banner exchange, authentication and
    // channel operations.
    session.set_timeout((SFTP_TIMEOUT_SECS * 1000) as u32);
    session.set_tcp_stream(stream);
    session
        .handshake()
        .map_err(|e| ExtractorError::Transport(format!("handshake with {}: {e}", config.host)))?;
    session
        .userauth_password(&config.username, &config.password)
        .map_err(|e| ExtractorError::Auth(e.to_string()))?;
    if !session.authenticated() {
        return Err(ExtractorError::Auth(format!(
            "authentication rejected for user {}",
            config.username
        )));
    }
    debug!("SFTP connection established");
    Ok(session)
}

fn build_remote_path(config: &SftpConfig, filename: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    if !config.remote_path.is_empty() {
        parts.push(&config.remote_path);
    }
    if !filename.is_empty() {
        parts.push(filename);
    }
    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

fn download_file(config: &SftpConfig, filename: &str) -> ExtractorResult<NamedTempFile> {
    let session = connect(config)?;
    let sftp = session
        .sftp()
        .map_err(|e| ExtractorError::Other(format!("could not open SFTP channel: {e}")))?;

    let remote_path = build_remote_path(config, filename);
    info!("Downloading {remote_path} from SFTP");
    let mut remote = sftp
        .open(Path::new(&remote_path))
        .map_err(|e| classify_sftp_error(e, &remote_path))?;

    let mut temp = tempfile::Builder::new()
        .suffix(".xlsx")
        .tempfile()
        .map_err(|e| ExtractorError::Other(e.to_string()))?;
    let bytes = std::io::copy(&mut remote, temp.as_file_mut())
        .map_err(|e| ExtractorError::Transport(format!("download of {remote_path}: {e}")))?;
    if bytes == 0 {
        return Err(ExtractorError::SourceMissing(format!(
            "{remote_path} is empty"
        )));
    }
    info!("Downloaded {filename} ({bytes} bytes)");
    Ok(temp)
}

fn classify_sftp_error(e: ssh2::Error, path: &str) -> ExtractorError {
    match e.code() {
        // SSH_FX_NO_SUCH_FILE
        ssh2::ErrorCode::SFTP(2) => ExtractorError::SourceMissing(path.to_string()),
        // SSH_FX_PERMISSION_DENIED
        ssh2::ErrorCode::SFTP(3) => ExtractorError::Auth(format!("permission denied: {path}")),
        _ => ExtractorError::Other(format!("{path}: {e}")),
    }
}

fn parse_locations_workbook(path: &Path) -> ExtractorResult<Vec<LocationRecord>> {
    let mut workbook =
        open_workbook_auto(path).map_err(|e| ExtractorError::Parse(e.to_string()))?;
    let sheet_names = workbook.sheet_names().to_owned();

    // Strategy 1: the sheet literally named "Locations". Strategy 2: the
    // first sheet. A workbook with no data rows in either is a failure.
    let mut candidates: Vec<&str> = Vec::new();
    if sheet_names.iter().any(|name| name == "Locations") {
        candidates.push("Locations");
    }
    if let Some(first) = sheet_names.first()
        && candidates.first() != Some(&first.as_str())
    {
        candidates.push(first);
    }

    for sheet in candidates {
        match workbook.worksheet_range(sheet) {
            Ok(range) => {
                let (data_rows, records) = records_from_range(&range);
                if data_rows > 0 {
                    info!(
                        "Read {} locations from sheet '{sheet}' ({} rows kept)",
                        data_rows,
                        records.len()
                    );
                    return Ok(records);
                }
                debug!("Sheet '{sheet}' has no data rows");
            }
            Err(e) => debug!("Could not read sheet '{sheet}': {e}"),
        }
    }

    Err(ExtractorError::Parse(
        "Could not read locations data from spreadsheet".to_string(),
    ))
}

/// Builds location records from a worksheet: the first row is matched
/// case-insensitively against the known header names, remaining rows become
/// records. Returns the number of data rows seen alongside the records that
/// survived the `warehouse_id` filter.
fn records_from_range(range: &Range<Data>) -> (usize, Vec<LocationRecord>) {
    let mut rows = range.rows();
    let Some(header_row) = rows.next() else {
        return (0, Vec::new());
    };
    let headers: Vec<Option<&'static str>> = header_row
        .iter()
        .map(|cell| cell_to_string(cell).as_deref().and_then(normalize_header))
        .collect();

    let mut data_rows = 0;
    let mut records = Vec::new();
    for row in rows {
        data_rows += 1;
        let mut record = LocationRecord::default();
        for (cell, header) in row.iter().zip(&headers) {
            let Some(column) = header else { continue };
            let value = cell_to_string(cell);
            match *column {
                "warehouse_id" => record.warehouse_id = value.unwrap_or_default(),
                "warehouse_code" => record.warehouse_code = value,
                "warehouse_name" => record.warehouse_name = value,
                "city" => record.city = value,
                "state" => record.state = value,
                "country" => record.country = value,
                "address1" => record.address1 = value,
                "address2" => record.address2 = value,
                "zip" => record.zip = value,
                _ => {}
            }
        }
        if record.warehouse_id.trim().is_empty() {
            continue;
        }
        records.push(record);
    }
    (data_rows, records)
}

/// Case-insensitive mapping from spreadsheet headers to location columns.
fn normalize_header(raw: &str) -> Option<&'static str> {
    match raw.trim().to_uppercase().as_str() {
        "WAREHOUSE_ID" => Some("warehouse_id"),
        "WAREHOUSE_CODE" => Some("warehouse_code"),
        "WAREHOUSE_NAME" | "LOCATION_NAME" => Some("warehouse_name"),
        "CITY" => Some("city"),
        "STATE" | "PROVINCE" => Some("state"),
        "COUNTRY" => Some("country"),
        "ADDRESS1" | "ADDRESS" => Some("address1"),
        "ADDRESS2" => Some("address2"),
        "ZIP" | "ZIP_CODE" | "POSTAL_CODE" => Some("zip"),
        _ => None,
    }
}

/// Cell to string cast: numeric ids lose a spurious `.0`, NaN-like sentinels
/// and empty cells become null.
fn cell_to_string(cell: &Data) -> Option<String> {
    let text = match cell {
        Data::String(s) => s.trim().to_string(),
        Data::Float(f) => {
            if f.fract() == 0.0 {
                format!("{}", *f as i64)
            } else {
                f.to_string()
            }
        }
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => dt.as_f64().to_string(),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Empty | Data::Error(_) => return None,
    };
    if text.is_empty() || text.eq_ignore_ascii_case("nan") || text.eq_ignore_ascii_case("none") {
        None
    } else {
        Some(text)
    }
}
