/*
 * SPDX-FileCopyrightText: Copyright (c) 2023 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
 * SPDX-License-Identifier: MIT
 *
 * Permission is hereby granted, free of charge, to any person obtaining a
 * copy of this software and associated documentation files (the "Software"),
 * to deal in the Software without restriction, including without limitation
 * the rights to use, copy, modify, merge, publish, distribute, sublicense,
 * and/or sell copies of the Software, and to permit persons to whom the
 * Software is furnished to do so, subject to the following conditions:
 *
 * The above copyright notice and this permission notice shall be included in
 * all copies or substantial portions of the Software.
 *
 * THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
 * IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
 * FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL
 * THE AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
 * LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
 * FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
 * DEALINGS IN THE SOFTWARE.
 */

// multipart.rs
// multipart/form-data bodies whose file parts are streamed from disk by a
// producer task, so firmware images are never held in memory. The length of
// the whole body is known up front: several BMCs refuse chunked uploads.

use std::{
    io,
    path::{Path, PathBuf},
};

use bytes::Bytes;
use tokio::{fs::File, io::AsyncReadExt, sync::mpsc, task::JoinHandle};
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;
use uuid::Uuid;

use crate::BmcError;

pub const CHUNK_SIZE: usize = 64 * 1024;
const CHANNEL_DEPTH: usize = 4;

#[derive(Debug, Clone)]
enum FormPart {
    Field {
        name: String,
        value: Bytes,
        content_type: Option<&'static str>,
    },
    File {
        name: String,
        filename: String,
        path: PathBuf,
        size: u64,
    },
}

/// A piece of a request body: literal bytes or a whole file read from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Bytes(Bytes),
    File { path: PathBuf, size: u64 },
}

#[derive(Debug, Clone)]
pub struct MultipartForm {
    boundary: String,
    parts: Vec<FormPart>,
}

impl Default for MultipartForm {
    fn default() -> Self {
        Self::new()
    }
}

impl MultipartForm {
    pub fn new() -> Self {
        Self::with_boundary(format!("libbmc{}", Uuid::new_v4().simple()))
    }

    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            parts: Vec::new(),
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// A field sent with `Content-Type: application/json`.
    pub fn json_field(mut self, name: &str, value: impl Into<Bytes>) -> Self {
        self.parts.push(FormPart::Field {
            name: name.to_string(),
            value: value.into(),
            content_type: Some("application/json"),
        });
        self
    }

    /// A plain field, no Content-Type header.
    pub fn text_field(mut self, name: &str, value: impl Into<Bytes>) -> Self {
        self.parts.push(FormPart::Field {
            name: name.to_string(),
            value: value.into(),
            content_type: None,
        });
        self
    }

    /// A file part. The size is taken now and checked again while streaming.
    pub async fn file(mut self, name: &str, path: &Path) -> Result<Self, BmcError> {
        let size = file_size(path).await?;
        let filename = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| name.to_string());
        self.parts.push(FormPart::File {
            name: name.to_string(),
            filename,
            path: path.to_path_buf(),
            size,
        });
        Ok(self)
    }

    fn part_header(
        &self,
        first: bool,
        name: &str,
        filename: Option<&str>,
        content_type: Option<&str>,
    ) -> String {
        let mut header = String::new();
        if !first {
            header.push_str("\r\n");
        }
        header.push_str(&format!("--{}\r\n", self.boundary));
        match filename {
            Some(filename) => header.push_str(&format!(
                "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n"
            )),
            None => header.push_str(&format!(
                "Content-Disposition: form-data; name=\"{name}\"\r\n"
            )),
        }
        if let Some(ct) = content_type {
            header.push_str(&format!("Content-Type: {ct}\r\n"));
        }
        header.push_str("\r\n");
        header
    }

    fn closing(&self) -> String {
        if self.parts.is_empty() {
            format!("--{}--\r\n", self.boundary)
        } else {
            format!("\r\n--{}--\r\n", self.boundary)
        }
    }

    /// The body as an ordered list of segments. Adjacent literal bytes are
    /// merged.
    pub fn segments(&self) -> Vec<Segment> {
        let mut segments = Vec::new();
        let mut literal: Vec<u8> = Vec::new();
        for (i, part) in self.parts.iter().enumerate() {
            match part {
                FormPart::Field {
                    name,
                    value,
                    content_type,
                } => {
                    literal.extend_from_slice(
                        self.part_header(i == 0, name, None, *content_type).as_bytes(),
                    );
                    literal.extend_from_slice(value);
                }
                FormPart::File {
                    name,
                    filename,
                    path,
                    size,
                } => {
                    literal.extend_from_slice(
                        self.part_header(
                            i == 0,
                            name,
                            Some(filename),
                            Some("application/octet-stream"),
                        )
                        .as_bytes(),
                    );
                    segments.push(Segment::Bytes(Bytes::from(std::mem::take(&mut literal))));
                    segments.push(Segment::File {
                        path: path.clone(),
                        size: *size,
                    });
                }
            }
        }
        literal.extend_from_slice(self.closing().as_bytes());
        segments.push(Segment::Bytes(Bytes::from(literal)));
        segments.retain(|s| !matches!(s, Segment::Bytes(b) if b.is_empty()));
        segments
    }

    /// The form encoded with every file part's content left out: part
    /// headers only.
    pub fn reference_encoding(&self) -> Bytes {
        let mut out = Vec::new();
        for segment in self.segments() {
            if let Segment::Bytes(b) = segment {
                out.extend_from_slice(&b);
            }
        }
        Bytes::from(out)
    }

    /// Exact length of the encoded body.
    pub fn content_length(&self) -> u64 {
        let files: u64 = self
            .parts
            .iter()
            .map(|p| match p {
                FormPart::File { size, .. } => *size,
                FormPart::Field { .. } => 0,
            })
            .sum();
        self.reference_encoding().len() as u64 + files
    }

    /// Starts the producer and returns the streaming body. The guard must be
    /// kept alive until the request has finished.
    pub fn into_body(self) -> (reqwest::Body, ProducerGuard) {
        let (stream, guard) = spawn_producer(self.segments());
        (reqwest::Body::wrap_stream(stream), guard)
    }
}

pub async fn file_size(path: &Path) -> Result<u64, BmcError> {
    let meta = tokio::fs::metadata(path).await.map_err(|e| {
        BmcError::FileError(format!("Could not stat {}: {e}", path.display()))
    })?;
    if !meta.is_file() {
        return Err(BmcError::FileError(format!(
            "{} is not a regular file",
            path.display()
        )));
    }
    Ok(meta.len())
}

/// Aborts the producer task when dropped, so it never outlives the request
/// it feeds.
#[derive(Debug)]
pub struct ProducerGuard {
    handle: JoinHandle<()>,
}

impl Drop for ProducerGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

type Chunk = Result<Bytes, io::Error>;

/// Feeds `segments` into a bounded channel from a spawned task.
pub fn spawn_producer(segments: Vec<Segment>) -> (ReceiverStream<Chunk>, ProducerGuard) {
    let (tx, rx) = mpsc::channel::<Chunk>(CHANNEL_DEPTH);
    let handle = tokio::spawn(async move {
        for segment in segments {
            let sent = match segment {
                Segment::Bytes(b) => tx.send(Ok(b)).await.is_ok(),
                Segment::File { path, size } => stream_file(&tx, &path, size).await,
            };
            if !sent {
                // receiver gone or the stream already carries an error
                return;
            }
        }
    });
    (ReceiverStream::new(rx), ProducerGuard { handle })
}

// Returns false once nothing more should be sent.
async fn stream_file(tx: &mpsc::Sender<Chunk>, path: &Path, size: u64) -> bool {
    let mut file = match File::open(path).await {
        Ok(f) => f,
        Err(e) => {
            let _ = tx.send(Err(e)).await;
            return false;
        }
    };
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total: u64 = 0;
    loop {
        let n = match file.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                return false;
            }
        };
        total += n as u64;
        if tx.send(Ok(Bytes::copy_from_slice(&buf[..n]))).await.is_err() {
            return false;
        }
    }
    if total != size {
        debug!("{} changed size during upload: {total} != {size}", path.display());
        let _ = tx
            .send(Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "{} is {total} bytes, expected {size}",
                    path.display()
                ),
            )))
            .await;
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tokio_stream::StreamExt;

    use super::*;

    async fn collect(stream: ReceiverStream<Chunk>) -> Result<Vec<u8>, io::Error> {
        let mut out = Vec::new();
        let mut stream = stream;
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }

    fn firmware_file(len: usize) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        f.write_all(&data).unwrap();
        f.flush().unwrap();
        f
    }

    #[tokio::test]
    async fn test_reference_encoding_layout() {
        let file = firmware_file(10);
        let form = MultipartForm::with_boundary("XyZ")
            .json_field("UpdateParameters", r#"{"Targets":[]}"#)
            .file("UpdateFile", file.path())
            .await
            .unwrap();
        let filename = file.path().file_name().unwrap().to_string_lossy().to_string();

        let expected = format!(
            "--XyZ\r\n\
             Content-Disposition: form-data; name=\"UpdateParameters\"\r\n\
             Content-Type: application/json\r\n\r\n\
             {{\"Targets\":[]}}\r\n\
             --XyZ\r\n\
             Content-Disposition: form-data; name=\"UpdateFile\"; filename=\"{filename}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n\
             \r\n--XyZ--\r\n"
        );
        assert_eq!(form.reference_encoding(), Bytes::from(expected));
    }

    #[tokio::test]
    async fn test_content_length_matches_streamed_body() {
        let file = firmware_file(3 * CHUNK_SIZE + 17);
        let form = MultipartForm::new()
            .json_field("UpdateParameters", r#"{"Targets":["/redfish/v1/Managers/1"]}"#)
            .file("UpdateFile", file.path())
            .await
            .unwrap();

        let expected_len = form.reference_encoding().len() as u64 + (3 * CHUNK_SIZE + 17) as u64;
        assert_eq!(form.content_length(), expected_len);

        let (stream, _guard) = spawn_producer(form.segments());
        let body = collect(stream).await.unwrap();
        assert_eq!(body.len() as u64, expected_len);
        assert!(body.ends_with(format!("\r\n--{}--\r\n", form.boundary()).as_bytes()));
    }

    #[tokio::test]
    async fn test_file_part_between_fields() {
        let file = firmware_file(5);
        let form = MultipartForm::with_boundary("b")
            .file("fw_image", file.path())
            .await
            .unwrap()
            .text_field("CSRF_TOKEN", "tok");

        let segments = form.segments();
        assert_eq!(segments.len(), 3);
        assert!(matches!(&segments[1], Segment::File { size: 5, .. }));
        let (stream, _guard) = spawn_producer(segments);
        let body = String::from_utf8(collect(stream).await.unwrap()).unwrap();
        assert!(body.starts_with("--b\r\nContent-Disposition: form-data; name=\"fw_image\""));
        assert!(body.contains("\u{0}\u{1}\u{2}\u{3}\u{4}\r\n--b\r\nContent-Disposition: form-data; name=\"CSRF_TOKEN\"\r\n\r\ntok\r\n--b--\r\n"));
    }

    #[tokio::test]
    async fn test_producer_reports_size_change() {
        let file = firmware_file(100);
        let segments = vec![Segment::File {
            path: file.path().to_path_buf(),
            size: 200,
        }];
        let (stream, _guard) = spawn_producer(segments);
        let err = collect(stream).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_missing_file() {
        let res = MultipartForm::new()
            .file("UpdateFile", Path::new("/nonexistent/firmware.bin"))
            .await;
        assert!(matches!(res, Err(BmcError::FileError(_))));
    }
}
