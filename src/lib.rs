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
//! Support library for ARK Ledger Nano S/X apps
//!
//! Every operation takes `&mut self`: one [`ArkApp`] never has two commands in
//! flight, so segments of different commands cannot interleave on the device.
//! Share an app between tasks behind a lock.

#![deny(warnings, trivial_casts, trivial_numeric_casts)]
#![deny(unused_import_braces, unused_qualifications)]
#![deny(missing_docs)]
#![doc(html_root_url = "https://docs.rs/ledger-ark/0.1.0")]

use std::fmt;
use std::str;

use ledger_transport::Exchange;
use ledger_zondax_generic::{App, AppExt, AppInfo, LedgerAppError};
use tracing::debug;

mod apdu;
mod bip44;
pub mod params;

pub use apdu::{segment_flag, ApduMessage, PayloadLengthError};
pub use bip44::{Bip44PathError, DerivationPath, PathViolation};

use params::{Confirmation, Context, InstructionCode, SegmentFlag, CHAIN_CODE_LEN, CLA};

/// Ledger App Error
#[derive(Debug, thiserror::Error)]
pub enum Error<E: std::error::Error> {
    /// Invalid derivation path
    #[error(transparent)]
    Bip44Path(#[from] Bip44PathError),

    /// Payload does not fit in one logical command
    #[error(transparent)]
    PayloadLength(#[from] PayloadLengthError),

    /// The message to sign contains non ASCII bytes
    #[error("Message must contain printable ASCII characters")]
    MessageAscii,

    /// The transport failed to deliver a segment
    #[error("transport error: {0}")]
    Transport(E),

    /// The device answered with an error status word
    #[error("device error {code:#06x}: {description}")]
    Device {
        /// Status word
        code: u16,
        /// Status word meaning
        description: String,
    },

    /// Invalid version error
    #[error("This version is not supported")]
    InvalidVersion,

    /// Public Key is invalid
    #[error("received an invalid PK")]
    InvalidPK,

    /// Address is invalid
    #[error("received an invalid address")]
    InvalidAddress,

    /// No signature has been returned
    #[error("received no signature back")]
    NoSignature,

    /// Generic Ledger app errors
    #[error("Ledger error: {0}")]
    Ledger(LedgerAppError<E>),

    /// Secp256k1 key errors
    #[error("Secp256k1 error: {0}")]
    Secp256k1(#[from] k256::elliptic_curve::Error),

    /// Utf8 conversion related error
    #[error("UTF8Error error: {0}")]
    Utf8(#[from] str::Utf8Error),
}

impl<E: std::error::Error> Error<E> {
    /// Whether the failure came from the transport or the device rather than local validation
    pub fn is_channel_failure(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Device { .. })
    }
}

/// ArkApp App Version
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Version {
    /// Application flags
    pub flags: u8,
    /// Version Major
    pub major: u8,
    /// Version Minor
    pub minor: u8,
    /// Version Patch
    pub patch: u8,
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// ArkApp configuration, as reported with the version
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AppConfiguration {
    /// Whether the app accepts arbitrary data
    pub arbitrary_data_enabled: bool,
    /// App version
    pub version: Version,
}

/// ArkApp address (includes pubkey and the corresponding address)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Address {
    /// Public Key
    pub public_key: k256::PublicKey,

    /// Address string format
    pub address: String,
}

/// Public key together with its BIP32 chaincode, both hex encoded
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtendedPublicKey {
    /// Compressed public key
    pub public_key: String,

    /// Chaincode
    pub chain_code: String,
}

/// Whether a message can be signed: ASCII bytes only
pub fn is_valid_message(message: &[u8]) -> bool {
    message.is_ascii()
}

/// `[len][bytes]` at the start of `data`, returning the field and what follows it
fn length_prefixed(data: &[u8]) -> Option<(&[u8], &[u8])> {
    let (&len, rest) = data.split_first()?;
    let len = len as usize;
    if len == 0 || rest.len() < len {
        return None;
    }
    Some(rest.split_at(len))
}

fn decode_extended_public_key(response: &[u8]) -> Option<ExtendedPublicKey> {
    let (public_key, rest) = length_prefixed(response)?;
    let chain_code = rest.get(..CHAIN_CODE_LEN)?;

    Some(ExtendedPublicKey {
        public_key: hex::encode(public_key),
        chain_code: hex::encode(chain_code),
    })
}

/// ARK App
pub struct ArkApp<E> {
    transport: E,
}

impl<E> App for ArkApp<E> {
    const CLA: u8 = CLA;
}

impl<E> ArkApp<E>
where
    E: Exchange + Send + Sync,
    E::Error: std::error::Error,
{
    /// Create a new app on top of a transport
    pub fn new(transport: E) -> Self {
        ArkApp { transport }
    }

    /// Release the transport
    pub fn into_inner(self) -> E {
        self.transport
    }

    /// Retrieve the app version as `major.minor.patch`
    pub async fn version(&mut self) -> Result<String, Error<E::Error>> {
        Ok(self.app_configuration().await?.version.to_string())
    }

    /// Retrieve the app version together with the app flags
    pub async fn app_configuration(&mut self) -> Result<AppConfiguration, Error<E::Error>> {
        let command = ApduMessage::new(
            CLA,
            InstructionCode::GetVersion as u8,
            Confirmation::NonConfirm as u8,
            Context::NoChaincode as u8,
            Vec::new(),
        )?;

        let response = command.send(&self.transport).await?;
        if response.len() < 4 {
            return Err(Error::InvalidVersion);
        }

        let version = Version {
            flags: response[0],
            major: response[1],
            minor: response[2],
            patch: response[3],
        };

        Ok(AppConfiguration {
            arbitrary_data_enabled: version.flags & 0x01 != 0,
            version,
        })
    }

    /// Retrieve name and version of the running app from the Ledger OS
    pub async fn app_info(&mut self) -> Result<AppInfo, Error<E::Error>> {
        <Self as AppExt<E>>::get_app_info(&self.transport)
            .await
            .map_err(Error::Ledger)
    }

    /// Retrieve the compressed public key as hex
    ///
    /// Firmware up to 2.0.1 rejects the chaincode selector, so a device or
    /// transport failure is retried once with the legacy request.
    pub async fn public_key(&mut self, path: &str) -> Result<String, Error<E::Error>> {
        let path = DerivationPath::parse(path)?;

        let command = ApduMessage::new(
            CLA,
            InstructionCode::GetPublicKey as u8,
            Confirmation::NonConfirm as u8,
            Context::NoChaincode as u8,
            path.to_bytes(),
        )?;

        let response = match command.send(&self.transport).await {
            Ok(response) => response,
            Err(err) if err.is_channel_failure() => {
                debug!(error = %err, "public key request rejected, retrying with legacy request");
                self.public_key_legacy(&path, Confirmation::NonConfirm).await?
            }
            Err(err) => return Err(err),
        };

        let (public_key, _) = length_prefixed(&response).ok_or(Error::InvalidPK)?;
        Ok(hex::encode(public_key))
    }

    /// Retrieve the public key and its chaincode
    ///
    /// The answer reads `[len][public key][chaincode]`.
    pub async fn extended_public_key(
        &mut self,
        path: &str,
    ) -> Result<ExtendedPublicKey, Error<E::Error>> {
        let path = DerivationPath::parse(path)?;

        let command = ApduMessage::new(
            CLA,
            InstructionCode::GetPublicKey as u8,
            Confirmation::NonConfirm as u8,
            Context::Chaincode as u8,
            path.to_bytes(),
        )?;

        let response = command.send(&self.transport).await?;
        decode_extended_public_key(&response).ok_or(Error::InvalidPK)
    }

    /// Retrieves the public key and address
    pub async fn address(
        &mut self,
        path: &str,
        require_confirmation: bool,
    ) -> Result<Address, Error<E::Error>> {
        let path = DerivationPath::parse(path)?;
        let confirmation = if require_confirmation {
            Confirmation::Confirm
        } else {
            Confirmation::NonConfirm
        };

        let response = self.public_key_legacy(&path, confirmation).await?;

        let (public_key, rest) = length_prefixed(&response).ok_or(Error::InvalidPK)?;
        let public_key = k256::PublicKey::from_sec1_bytes(public_key)?;
        let (address, _) = length_prefixed(rest).ok_or(Error::InvalidAddress)?;
        let address = str::from_utf8(address)?.to_owned();

        Ok(Address {
            public_key,
            address,
        })
    }

    /// Sign a message with ECDSA, returning the signature as hex
    pub async fn sign_message(
        &mut self,
        path: &str,
        message: &[u8],
    ) -> Result<String, Error<E::Error>> {
        if !is_valid_message(message) {
            return Err(Error::MessageAscii);
        }
        self.sign(InstructionCode::SignMessage, Context::Ecdsa, path, message)
            .await
    }

    /// Sign a message with Schnorr, returning the signature as hex
    pub async fn sign_message_with_schnorr(
        &mut self,
        path: &str,
        message: &[u8],
    ) -> Result<String, Error<E::Error>> {
        if !is_valid_message(message) {
            return Err(Error::MessageAscii);
        }
        self.sign(InstructionCode::SignMessage, Context::Schnorr, path, message)
            .await
    }

    /// Sign a serialized transaction with ECDSA, returning the signature as hex
    pub async fn sign_transaction(
        &mut self,
        path: &str,
        transaction: &[u8],
    ) -> Result<String, Error<E::Error>> {
        self.sign(
            InstructionCode::SignTransaction,
            Context::Ecdsa,
            path,
            transaction,
        )
        .await
    }

    /// Sign a serialized transaction with Schnorr, returning the signature as hex
    pub async fn sign_transaction_with_schnorr(
        &mut self,
        path: &str,
        transaction: &[u8],
    ) -> Result<String, Error<E::Error>> {
        self.sign(
            InstructionCode::SignTransaction,
            Context::Schnorr,
            path,
            transaction,
        )
        .await
    }

    async fn public_key_legacy(
        &self,
        path: &DerivationPath,
        confirmation: Confirmation,
    ) -> Result<Vec<u8>, Error<E::Error>> {
        let command = ApduMessage::new(
            CLA,
            InstructionCode::GetPublicKey as u8,
            confirmation as u8,
            Context::Ecdsa as u8,
            path.to_bytes(),
        )?;

        command.send(&self.transport).await
    }

    async fn sign(
        &self,
        ins: InstructionCode,
        context: Context,
        path: &str,
        data: &[u8],
    ) -> Result<String, Error<E::Error>> {
        let path = DerivationPath::parse(path)?;

        let mut payload = path.to_bytes();
        payload.extend_from_slice(data);

        let command = ApduMessage::new(
            CLA,
            ins as u8,
            SegmentFlag::Single as u8,
            context as u8,
            payload,
        )?;

        let response = command.send(&self.transport).await?;
        if response.is_empty() {
            return Err(Error::NoSignature);
        }

        Ok(hex::encode(response))
    }
}
