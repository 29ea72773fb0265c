//! The coordinator/worker wire format.
//!
//! A request is one JSON header line followed by exactly `content_len` raw
//! document bytes, so captures that are not valid UTF-8 cross the boundary
//! untouched and decode failures surface inside the worker. The reply is a
//! single JSON line.

use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use tracing::trace;

use crate::classify::Classification;
use crate::definitions::CheckSpec;
use crate::errors::{ScanError, ScanResult};
use crate::hosts::{EncodingMode, HostDocument};
use crate::results::SearchResult;
use crate::search;

/// Everything about a host except its content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostHeader {
    pub id: String,
    pub name: String,
    pub path: PathBuf,
    pub encoding: EncodingMode,
    pub classification: Classification,
    pub content_len: u64,
}

impl HostHeader {
    pub fn describe(host: &HostDocument) -> Self {
        Self {
            id: host.id.clone(),
            name: host.name.clone(),
            path: host.path.clone(),
            encoding: host.encoding,
            classification: host.classification,
            content_len: host.bytes.len() as u64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub check: CheckSpec,
    pub host: HostHeader,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerReply {
    pub result: SearchResult,
}

/// Writes one request for running `check` against `host`
pub fn write_request<W: Write>(
    writer: &mut W,
    check: &CheckSpec,
    host: &HostDocument,
) -> ScanResult<()> {
    let request = WorkerRequest {
        check: check.clone(),
        host: HostHeader::describe(host),
    };
    serde_json::to_writer(&mut *writer, &request)?;
    writer.write_all(b"\n")?;
    writer.write_all(&host.bytes)?;
    writer.flush()?;
    Ok(())
}

/// Reads one request, reassembling the host document
pub fn read_request<R: BufRead>(reader: &mut R) -> ScanResult<(CheckSpec, HostDocument)> {
    let mut header = String::new();
    if reader.read_line(&mut header)? == 0 {
        return Err(ScanError::worker_protocol("empty request"));
    }
    let request: WorkerRequest = serde_json::from_str(&header)?;

    let len = usize::try_from(request.host.content_len).map_err(|_| {
        ScanError::worker_protocol(format!(
            "document too large: {} bytes",
            request.host.content_len
        ))
    })?;
    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes).map_err(|e| {
        ScanError::worker_protocol(format!("truncated document ({} bytes expected): {}", len, e))
    })?;

    let header = request.host;
    let host = HostDocument::from_parts(
        header.id,
        header.path,
        header.name,
        bytes,
        header.encoding,
        header.classification,
    );
    Ok((request.check, host))
}

pub fn write_reply<W: Write>(writer: &mut W, result: &SearchResult) -> ScanResult<()> {
    serde_json::to_writer(&mut *writer, &WorkerReply {
        result: result.clone(),
    })?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

/// Reads the single reply line a worker writes before exiting
pub fn read_reply<R: BufRead>(reader: &mut R) -> ScanResult<SearchResult> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Err(ScanError::worker_protocol("worker exited without a reply"));
    }
    let reply: WorkerReply = serde_json::from_str(&line)
        .map_err(|e| ScanError::worker_protocol(format!("undecodable reply: {}", e)))?;
    Ok(reply.result)
}

/// Worker side: reads one request, runs it and writes the reply
pub fn serve<R: BufRead, W: Write>(reader: &mut R, writer: &mut W) -> ScanResult<()> {
    let (check, host) = read_request(reader)?;
    trace!("Worker running {} @ {}", check.id, host.name);
    let result = search::execute(&check, &host);
    write_reply(writer, &result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::Target;
    use crate::results::UnitStatus;
    use std::collections::BTreeMap;
    use std::io::Cursor;

    fn check() -> CheckSpec {
        CheckSpec {
            id: "root-login".to_string(),
            target: Target::Any,
            producer: None,
            distribution: None,
            pattern: r"^PermitRootLogin\s+(?P<value>\S+)".to_string(),
            multiline: false,
            case_insensitive: false,
            captures: vec!["value".to_string()],
            fields: BTreeMap::new(),
            description: None,
            source: PathBuf::from("ssh.yaml"),
        }
    }

    #[test]
    fn test_serve_executes_request() {
        let host = HostDocument::from_bytes(
            "web01.txt",
            b"Port 22\nPermitRootLogin yes\n".to_vec(),
            EncodingMode::FailFast,
        );
        let mut request = Vec::new();
        write_request(&mut request, &check(), &host).unwrap();

        let mut reply = Vec::new();
        serve(&mut Cursor::new(request), &mut reply).unwrap();
        assert!(reply.ends_with(b"\n"));

        let result = read_reply(&mut Cursor::new(reply)).unwrap();
        assert_eq!(result.status, UnitStatus::Completed);
        assert_eq!(result.host_id, host.id);
        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.matches[0].line_number, 2);
        assert_eq!(result.matches[0].fields["value"], "yes");
    }

    #[test]
    fn test_invalid_utf8_crosses_untouched() {
        let host = HostDocument::from_bytes(
            "bin.txt",
            vec![0xff, b'\n', 0xfe],
            EncodingMode::FailFast,
        );
        let mut request = Vec::new();
        write_request(&mut request, &check(), &host).unwrap();

        let (_, received) = read_request(&mut Cursor::new(request)).unwrap();
        assert_eq!(&received.bytes[..], &host.bytes[..]);
        assert_eq!(received.id, host.id);
        assert_eq!(received.classification, host.classification);

        let result = search::execute(&check(), &received);
        assert!(matches!(result.status, UnitStatus::Failed { .. }));
    }

    #[test]
    fn test_truncated_request() {
        let host = HostDocument::from_bytes(
            "web01.txt",
            b"PermitRootLogin yes\n".to_vec(),
            EncodingMode::FailFast,
        );
        let mut request = Vec::new();
        write_request(&mut request, &check(), &host).unwrap();
        request.truncate(request.len() - 5);

        let err = read_request(&mut Cursor::new(request)).unwrap_err();
        assert!(matches!(err, ScanError::WorkerProtocol(_)));
    }

    #[test]
    fn test_missing_and_garbled_replies() {
        let err = read_reply(&mut Cursor::new(Vec::new())).unwrap_err();
        assert!(err.to_string().contains("without a reply"));

        let err = read_reply(&mut Cursor::new(b"not json\n".to_vec())).unwrap_err();
        assert!(matches!(err, ScanError::WorkerProtocol(_)));
    }
}
