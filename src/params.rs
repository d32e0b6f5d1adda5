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
//! APDU constants of the ARK app

/// APDU Class byte
pub const CLA: u8 = 0xE0;

/// Maximum bytes carried by a single APDU segment
pub const CHUNK_SIZE: usize = 255;

/// Maximum number of segments of one logical command
pub const CHUNK_MAX: usize = 10;

/// Maximum payload of one logical command
pub const PAYLOAD_MAX: usize = CHUNK_SIZE * CHUNK_MAX;

/// Maximum number of derivation path elements accepted by the device
pub const MAX_PATH_ELEMENTS: usize = 10;

/// Length of the chaincode returned with an extended public key
pub const CHAIN_CODE_LEN: usize = 32;

/// BIP44 purpose value
pub const BIP44_PURPOSE: u32 = 44;

/// ARK coin type
pub const ARK_COIN_TYPE: u32 = 111;

/// BIP44 hardened derivation flag
pub const BIP44_HARDENED: u32 = 0x8000_0000;

/// APDU instruction codes
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstructionCode {
    /// Get a public key (and legacy address)
    GetPublicKey = 0x02,
    /// Sign a transaction
    SignTransaction = 0x04,
    /// Get the app version and flags
    GetVersion = 0x06,
    /// Sign a message
    SignMessage = 0x08,
}

/// P1 for read commands: whether the user must approve on-device
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Confirmation {
    /// Do not request user approval
    NonConfirm = 0x00,
    /// Request user approval
    Confirm = 0x01,
}

/// P1 for signing commands: position of a segment in a logical command
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegmentFlag {
    /// First of several segments
    First = 0x00,
    /// Any segment strictly between the first and the last
    More = 0x01,
    /// The only segment
    Single = 0x80,
    /// Last of several segments
    Last = 0x81,
}

/// P2 selector: chaincode context for reads, signature scheme for signing
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Context {
    /// Do not return a chaincode
    NoChaincode = 0x00,
    /// Return a chaincode
    Chaincode = 0x01,
    /// ECDSA signatures
    Ecdsa = 0x40,
    /// Schnorr signatures
    Schnorr = 0x50,
}
