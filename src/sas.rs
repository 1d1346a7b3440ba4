// This file is part of IoT Hub E2E.
//
// Copyright 2026 SECO Mind Srl
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! Shared access signature tokens for the service REST APIs.

use base64::prelude::*;
use chrono::{DateTime, TimeDelta, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use sha2::Sha256;
use url::form_urlencoded::Serializer as UrlSerializer;

type HmacSha256 = Hmac<Sha256>;

/// Default validity of a generated token, in seconds.
pub const DEFAULT_TOKEN_TTL_SECS: i64 = 3600;

#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum SasError {
    #[error("the shared access key isn't valid base64")]
    InvalidKey(#[from] base64::DecodeError),
    #[error("invalid HMAC key length")]
    KeyLength(#[from] hmac::digest::InvalidLength),
}

/// Credential signing tokens for a resource with a shared access key.
#[derive(Clone)]
pub struct SasCredential {
    resource_uri: String,
    key_name: Option<String>,
    key: String,
}

impl SasCredential {
    pub fn new(resource_uri: impl Into<String>, key_name: Option<String>, key: String) -> Self {
        Self {
            resource_uri: resource_uri.into(),
            key_name,
            key,
        }
    }

    pub fn resource_uri(&self) -> &str {
        &self.resource_uri
    }

    /// Token valid for [`DEFAULT_TOKEN_TTL_SECS`] from now.
    pub fn token(&self) -> Result<String, SasError> {
        self.token_expiring_at(Utc::now() + TimeDelta::seconds(DEFAULT_TOKEN_TTL_SECS))
    }

    /// Token in the `SharedAccessSignature sr=..&sig=..&se=..[&skn=..]` format.
    pub fn token_expiring_at(&self, expiry: DateTime<Utc>) -> Result<String, SasError> {
        let expiry = expiry.timestamp().to_string();
        let resource_uri =
            utf8_percent_encode(&self.resource_uri.to_lowercase(), NON_ALPHANUMERIC).to_string();

        let signature = sign(&self.key, &format!("{resource_uri}\n{expiry}"))?;

        let mut token = UrlSerializer::new(format!("SharedAccessSignature sr={resource_uri}"));
        token.append_pair("sig", &signature);
        token.append_pair("se", &expiry);

        if let Some(name) = &self.key_name {
            token.append_pair("skn", name);
        }

        Ok(token.finish())
    }
}

impl std::fmt::Debug for SasCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SasCredential")
            .field("resource_uri", &self.resource_uri)
            .field("key_name", &self.key_name)
            .finish_non_exhaustive()
    }
}

/// Base64 HMAC-SHA256 of the data with the base64 decoded key.
pub fn sign(key: &str, data: &str) -> Result<String, SasError> {
    let key = BASE64_STANDARD.decode(key)?;

    let mut mac = HmacSha256::new_from_slice(&key)?;
    mac.update(data.as_bytes());

    Ok(BASE64_STANDARD.encode(mac.finalize().into_bytes()))
}
