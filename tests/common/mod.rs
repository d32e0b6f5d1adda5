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
//! Test transports
#![allow(dead_code)]

use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::Mutex;

use async_trait::async_trait;
use k256::ecdsa::{signature::Signer, Signature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use ledger_transport::{APDUAnswer, APDUCommand, Exchange};

pub const PATH: &str = "44'/111'/0'/0/0";
pub const PATH_HEX: &str = "058000002c8000006f800000000000000000000000";
pub const ADDRESS: &str = "AewxfHQobSc49a4radHp74JZCGP8LRe4xA";
pub const CHAIN_CODE: [u8; 32] = [0xcc; 32];

#[derive(Debug, thiserror::Error)]
pub enum MockError {
    #[error("unexpected apdu {0}")]
    Unexpected(String),
    #[error("no recorded exchange left for {0}")]
    Exhausted(String),
    #[error("malformed recorded answer")]
    Malformed,
}

/// Replays `=> apdu` / `<= answer` hex records, checking each sent APDU
pub struct ReplayTransport {
    record: Mutex<VecDeque<(String, String)>>,
    sent: Mutex<Vec<String>>,
}

impl ReplayTransport {
    pub fn new(record: &str) -> Self {
        let mut exchanges = VecDeque::new();
        let mut pending = None;

        for line in record.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if let Some(apdu) = line.strip_prefix("=>") {
                pending = Some(apdu.trim().to_lowercase());
            } else if let Some(answer) = line.strip_prefix("<=") {
                let apdu = pending.take().expect("answer without apdu");
                exchanges.push_back((apdu, answer.trim().to_lowercase()));
            } else {
                panic!("bad record line {}", line);
            }
        }

        ReplayTransport {
            record: Mutex::new(exchanges),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Number of APDUs the app sent
    pub fn calls(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Exchange for ReplayTransport {
    type Error = MockError;
    type AnswerType = Vec<u8>;

    async fn exchange<I>(
        &self,
        command: &APDUCommand<I>,
    ) -> Result<APDUAnswer<Self::AnswerType>, Self::Error>
    where
        I: Deref<Target = [u8]> + Send + Sync,
    {
        let apdu = hex::encode(command.serialize());
        self.sent.lock().unwrap().push(apdu.clone());

        let (expected, answer) = self
            .record
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| MockError::Exhausted(apdu.clone()))?;

        if expected != apdu {
            return Err(MockError::Unexpected(apdu));
        }

        let answer = hex::decode(answer).map_err(|_| MockError::Malformed)?;
        APDUAnswer::from_answer(answer).map_err(|_| MockError::Malformed)
    }
}

const SW_OK: [u8; 2] = [0x90, 0x00];
const SW_INVALID_P1P2: [u8; 2] = [0x6b, 0x00];
const SW_CONDITIONS: [u8; 2] = [0x69, 0x85];
const SW_INS_NOT_SUPPORTED: [u8; 2] = [0x6d, 0x00];

struct Accumulator {
    ins: u8,
    p2: u8,
    data: Vec<u8>,
}

/// A minimal ARK app: answers reads and signs accumulated commands with ECDSA
pub struct EmulatedDevice {
    key: SigningKey,
    legacy_firmware: bool,
    pending: Mutex<Option<Accumulator>>,
    calls: Mutex<usize>,
}

impl EmulatedDevice {
    pub fn new() -> Self {
        EmulatedDevice {
            key: SigningKey::from_slice(&[0x42; 32]).unwrap(),
            legacy_firmware: false,
            pending: Mutex::new(None),
            calls: Mutex::new(0),
        }
    }

    /// Firmware up to 2.0.1 only knows the ECDSA selector for public keys
    pub fn legacy() -> Self {
        EmulatedDevice {
            legacy_firmware: true,
            ..EmulatedDevice::new()
        }
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key().clone()
    }

    pub fn public_key(&self) -> k256::PublicKey {
        k256::PublicKey::from(self.key.verifying_key())
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key().to_encoded_point(true).as_bytes())
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }

    fn answer(&self, cla: u8, ins: u8, p1: u8, p2: u8, data: &[u8]) -> Vec<u8> {
        if cla != 0xe0 {
            return vec![0x6e, 0x00];
        }

        match ins {
            0x06 => vec![0x01, 0x02, 0x03, 0x01, 0x90, 0x00],
            0x02 => self.public_key_answer(p2),
            0x04 | 0x08 => self.accumulate(ins, p1, p2, data),
            _ => SW_INS_NOT_SUPPORTED.to_vec(),
        }
    }

    fn public_key_answer(&self, p2: u8) -> Vec<u8> {
        let key = self.public_key().to_encoded_point(true);
        let mut answer = vec![key.as_bytes().len() as u8];
        answer.extend_from_slice(key.as_bytes());

        match (p2, self.legacy_firmware) {
            (0x40, _) => {
                answer.push(ADDRESS.len() as u8);
                answer.extend_from_slice(ADDRESS.as_bytes());
            }
            (0x01, false) => answer.extend_from_slice(&CHAIN_CODE),
            (0x00, false) => {}
            _ => return SW_INVALID_P1P2.to_vec(),
        }

        answer.extend_from_slice(&SW_OK);
        answer
    }

    fn accumulate(&self, ins: u8, p1: u8, p2: u8, data: &[u8]) -> Vec<u8> {
        let mut pending = self.pending.lock().unwrap();

        let complete = match p1 {
            0x80 | 0x00 => {
                *pending = Some(Accumulator {
                    ins,
                    p2,
                    data: data.to_vec(),
                });
                p1 == 0x80
            }
            0x01 | 0x81 => {
                let continues =
                    matches!(pending.as_ref(), Some(acc) if acc.ins == ins && acc.p2 == p2);
                if !continues {
                    *pending = None;
                    return SW_CONDITIONS.to_vec();
                }
                if let Some(acc) = pending.as_mut() {
                    acc.data.extend_from_slice(data);
                }
                p1 == 0x81
            }
            _ => return SW_INVALID_P1P2.to_vec(),
        };

        if !complete {
            return SW_OK.to_vec();
        }

        let acc = match pending.take() {
            Some(acc) => acc,
            None => return SW_CONDITIONS.to_vec(),
        };

        let path_len = 1 + 4 * acc.data[0] as usize;
        let message = &acc.data[path_len..];
        let signature: Signature = self.key.sign(message);

        // Schnorr requests get a compact 64 byte signature
        let mut answer = match acc.p2 {
            0x40 => signature.to_der().as_bytes().to_vec(),
            _ => signature.to_bytes().to_vec(),
        };
        answer.extend_from_slice(&SW_OK);
        answer
    }
}

#[async_trait]
impl Exchange for EmulatedDevice {
    type Error = MockError;
    type AnswerType = Vec<u8>;

    async fn exchange<I>(
        &self,
        command: &APDUCommand<I>,
    ) -> Result<APDUAnswer<Self::AnswerType>, Self::Error>
    where
        I: Deref<Target = [u8]> + Send + Sync,
    {
        *self.calls.lock().unwrap() += 1;
        let answer = self.answer(command.cla, command.ins, command.p1, command.p2, &command.data);
        APDUAnswer::from_answer(answer).map_err(|_| MockError::Malformed)
    }
}
