/*******************************************************************************
*   (c) 2020 ZondaX GmbH
*
*  Licensed under the Apache License, Version 2.0 (the "License");
*  you may not use this file except in compliance with the License.
*  You may obtain a copy of the License at
*
*      http://www.apache.org/licenses/LICENSE-2.0
*
*  Unless required by applicable law or agreed to in writing, software
*  distributed under the License is distributed on an "AS IS" BASIS,
*  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
*  See the License for the specific language governing permissions and
*  limitations under the License.
********************************************************************************/
//! Chunked APDU commands
//!
//! A logical command carries up to [`PAYLOAD_MAX`] bytes. It goes out as one or
//! more segments of at most [`CHUNK_SIZE`] bytes, P1 telling the device where a
//! segment sits in the sequence.

use ledger_transport::{APDUCommand, APDUErrorCode, Exchange};
use tracing::{debug, trace};

use crate::params::{SegmentFlag, CHUNK_SIZE, PAYLOAD_MAX};
use crate::Error;

/// Payload too large for one logical command
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("Payload length of {actual} exceeds {limit}")]
pub struct PayloadLengthError {
    /// Length of the rejected payload
    pub actual: usize,
    /// Maximum accepted length
    pub limit: usize,
}

/// Position flag of segment `index` out of `count`
pub fn segment_flag(index: usize, count: usize) -> SegmentFlag {
    if count <= 1 {
        SegmentFlag::Single
    } else if index == 0 {
        SegmentFlag::First
    } else if index + 1 >= count {
        SegmentFlag::Last
    } else {
        SegmentFlag::More
    }
}

/// One logical command for the device
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApduMessage {
    cla: u8,
    ins: u8,
    p1: u8,
    p2: u8,
    payload: Vec<u8>,
}

impl ApduMessage {
    /// Builds a command, rejecting payloads over [`PAYLOAD_MAX`]
    pub fn new(cla: u8, ins: u8, p1: u8, p2: u8, payload: Vec<u8>) -> Result<Self, PayloadLengthError> {
        if payload.len() > PAYLOAD_MAX {
            return Err(PayloadLengthError {
                actual: payload.len(),
                limit: PAYLOAD_MAX,
            });
        }

        Ok(ApduMessage {
            cla,
            ins,
            p1,
            p2,
            payload,
        })
    }

    /// Number of segments the payload is split into
    pub fn segment_count(&self) -> usize {
        if self.payload.len() <= CHUNK_SIZE {
            1
        } else {
            (self.payload.len() + CHUNK_SIZE - 1) / CHUNK_SIZE
        }
    }

    /// The segments in send order
    ///
    /// A lone segment keeps the caller's P1; otherwise P1 is the position flag.
    pub fn segments(&self) -> Vec<APDUCommand<&[u8]>> {
        let chunks: Vec<&[u8]> = if self.payload.len() <= CHUNK_SIZE {
            vec![&self.payload[..]]
        } else {
            self.payload.chunks(CHUNK_SIZE).collect()
        };
        let count = chunks.len();

        chunks
            .into_iter()
            .enumerate()
            .map(|(index, data)| APDUCommand {
                cla: self.cla,
                ins: self.ins,
                p1: if count == 1 {
                    self.p1
                } else {
                    segment_flag(index, count) as u8
                },
                p2: self.p2,
                data,
            })
            .collect()
    }

    /// Sends every segment in order and returns the reassembled response
    ///
    /// Each segment waits for the previous answer. The first failing segment
    /// aborts the command; nothing is retried here.
    pub async fn send<E>(&self, transport: &E) -> Result<Vec<u8>, Error<E::Error>>
    where
        E: Exchange + Send + Sync,
        E::Error: std::error::Error,
    {
        let segments = self.segments();
        debug!(
            ins = self.ins,
            p2 = self.p2,
            len = self.payload.len(),
            segments = segments.len(),
            "sending apdu"
        );

        let mut response = Vec::new();
        for (index, segment) in segments.iter().enumerate() {
            trace!(index, p1 = segment.p1, data = %hex::encode(segment.data), "segment");

            let answer = transport.exchange(segment).await.map_err(Error::Transport)?;

            match answer.error_code() {
                Ok(APDUErrorCode::NoError) => {}
                Ok(err) => {
                    debug!(index, retcode = answer.retcode(), "segment rejected");
                    return Err(Error::Device {
                        code: answer.retcode(),
                        description: err.description(),
                    });
                }
                Err(code) => {
                    debug!(index, retcode = code, "segment rejected");
                    return Err(Error::Device {
                        code,
                        description: "unknown status word".to_owned(),
                    });
                }
            }

            trace!(index, len = answer.data().len(), "segment answer");

            // status word already split off by APDUAnswer
            response.extend_from_slice(answer.data());
        }

        trace!(len = response.len(), "response");
        Ok(response)
    }
}
