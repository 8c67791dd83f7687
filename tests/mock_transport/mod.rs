// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A scripted [`DataTransport`] double for integration tests.
//!
//! Each sub-request is looked up by its sorted, comma-joined PV list. The matching [`Script`]
//! controls what frames are delivered, with what per-frame delay (to simulate out-of-order
//! arrival across concurrent streams), and how the stream terminates.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use archive_query_engine::model::PvName;
use archive_query_engine::request::MetadataRequest;
use archive_query_engine::transport::{
    CursorOp, DataResponse, DataTransport, StreamItem, WireBucket, WireDataRequest, WireMetadataResponse,
};
use archive_query_engine::ErrorKind;
use async_trait::async_trait;
use tokio::sync::mpsc;

pub struct Script {
    pub frames: Vec<(Duration, WireBucket)>,
    pub terminal: DataResponse,
    /// If set, the stream sends an `Err(TransportFailure)` after this many frames instead of
    /// delivering the rest of `frames` or the terminal response.
    pub fail_after: Option<usize>,
}

impl Script {
    pub fn complete(frames: Vec<WireBucket>) -> Self {
        Self {
            frames: frames.into_iter().map(|f| (Duration::ZERO, f)).collect(),
            terminal: DataResponse::Complete,
            fail_after: None,
        }
    }

    pub fn delayed(frames: Vec<(Duration, WireBucket)>) -> Self {
        Self {
            frames,
            terminal: DataResponse::Complete,
            fail_after: None,
        }
    }

    pub fn failing_after(frames: Vec<WireBucket>, fail_after: usize) -> Self {
        Self {
            frames: frames.into_iter().map(|f| (Duration::ZERO, f)).collect(),
            terminal: DataResponse::Complete,
            fail_after: Some(fail_after),
        }
    }
}

pub struct ScriptedTransport {
    scripts: Mutex<HashMap<String, Script>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_script(self, pvs: &[&str], script: Script) -> Self {
        self.scripts.lock().unwrap().insert(key_for(pvs), script);
        self
    }

    fn take_script(&self, pvs: &[PvName]) -> Option<Script> {
        let key = key_for_owned(pvs);
        self.scripts.lock().unwrap().remove(&key)
    }
}

fn key_for(pvs: &[&str]) -> String {
    let mut sorted: Vec<&str> = pvs.to_vec();
    sorted.sort_unstable();
    sorted.join(",")
}

fn key_for_owned(pvs: &[PvName]) -> String {
    let mut sorted: Vec<String> = pvs.to_vec();
    sorted.sort();
    sorted.join(",")
}

#[async_trait]
impl DataTransport for ScriptedTransport {
    async fn unary(&self, request: WireDataRequest) -> archive_query_engine::Result<(Vec<WireBucket>, DataResponse)> {
        let script = self
            .take_script(&request.pvs)
            .ok_or_else(|| ErrorKind::Internal.with_message("no script registered for this sub-request"))?;
        let frames = script.frames.into_iter().map(|(_, frame)| frame).collect();
        Ok((frames, script.terminal))
    }

    async fn server_stream(
        &self,
        request: WireDataRequest,
    ) -> archive_query_engine::Result<mpsc::Receiver<archive_query_engine::Result<StreamItem>>> {
        let script = self
            .take_script(&request.pvs)
            .ok_or_else(|| ErrorKind::Internal.with_message("no script registered for this sub-request"))?;
        let (tx, rx) = mpsc::channel(script.frames.len() + 1);

        tokio::spawn(async move {
            for (index, (delay, frame)) in script.frames.into_iter().enumerate() {
                if delay > Duration::ZERO {
                    tokio::time::sleep(delay).await;
                }
                if tx.send(Ok(StreamItem::Frame(frame))).await.is_err() {
                    return;
                }
                if script.fail_after == Some(index + 1) {
                    let _ = tx
                        .send(Err(ErrorKind::TransportFailure.with_message("injected mid-stream failure")))
                        .await;
                    return;
                }
            }
            let _ = tx.send(Ok(StreamItem::Done(script.terminal))).await;
        });

        Ok(rx)
    }

    async fn bidi_cursor(
        &self,
        request: WireDataRequest,
    ) -> archive_query_engine::Result<(mpsc::Sender<CursorOp>, mpsc::Receiver<archive_query_engine::Result<StreamItem>>)> {
        let (cmd_tx, mut cmd_rx) = mpsc::channel(8);
        let rx = self.server_stream(request).await?;
        tokio::spawn(async move { while cmd_rx.recv().await.is_some() {} });
        Ok((cmd_tx, rx))
    }

    async fn metadata(&self, _request: MetadataRequest) -> archive_query_engine::Result<WireMetadataResponse> {
        Ok(WireMetadataResponse { entries: vec![] })
    }
}

