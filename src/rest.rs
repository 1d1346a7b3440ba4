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

//! HTTP plumbing shared by the service REST clients.

use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};

use crate::sas::{SasCredential, SasError};

/// Errors building or signing a request.
#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum RestError {
    #[error("couldn't build the HTTP client")]
    Client(#[from] reqwest::Error),
    #[error("invalid service url")]
    Url(#[from] url::ParseError),
    #[error("the service url can't be a base")]
    BaseUrl,
    #[error("couldn't sign the request")]
    Sas(#[from] SasError),
    #[error("invalid authorization header")]
    Header(#[from] reqwest::header::InvalidHeaderValue),
}

/// Signed requests to a service REST API.
#[derive(Debug, Clone)]
pub(crate) struct RestClient {
    base_url: Url,
    credential: SasCredential,
    api_version: &'static str,
    client: Client,
}

impl RestClient {
    pub(crate) fn new(
        base_url: Url,
        credential: SasCredential,
        api_version: &'static str,
    ) -> Result<Self, RestError> {
        if base_url.cannot_be_a_base() {
            return Err(RestError::BaseUrl);
        }

        let client = Client::builder().build()?;

        Ok(Self {
            base_url,
            credential,
            api_version,
            client,
        })
    }

    /// Base url of the `https://<host>/` form.
    pub(crate) fn host_url(host_name: &str) -> Result<Url, RestError> {
        Url::parse(&format!("https://{host_name}/")).map_err(RestError::from)
    }

    /// Url of the path segments with the `api-version` query.
    pub(crate) fn endpoint(&self, segments: &[&str]) -> Result<Url, RestError> {
        let mut url = self.base_url.clone();

        url.path_segments_mut()
            .map_err(|()| RestError::BaseUrl)?
            .pop_if_empty()
            .extend(segments);

        url.query_pairs_mut()
            .append_pair("api-version", self.api_version);

        Ok(url)
    }

    /// Request with a fresh shared access signature.
    pub(crate) fn request(&self, method: Method, url: Url) -> Result<RequestBuilder, RestError> {
        let mut auth = HeaderValue::from_str(&self.credential.token()?)?;
        auth.set_sensitive(true);

        Ok(self.client.request(method, url).header(AUTHORIZATION, auth))
    }
}

/// Returns the successful response, or the error status with its body.
pub(crate) async fn error_status(res: Response) -> Result<Response, (StatusCode, String)> {
    let status = res.status();

    if status.is_client_error() || status.is_server_error() {
        let body = res.text().await.unwrap_or_default();

        Err((status, body))
    } else {
        Ok(res)
    }
}
