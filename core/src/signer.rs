// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

use crate::{
    Context, CredentialResolver, Error, ProvideCredential, Result, SignRequest, SigningCredential,
};
use http::request::Parts;
use std::sync::Arc;

/// Signer is the main struct used to sign the request.
///
/// It pairs a [`CredentialResolver`] with a [`SignRequest`] strategy. Signing
/// waits for the resolver to settle and refuses to touch the request when no
/// usable credential is available, so an unsigned request never leaves.
#[derive(Clone, Debug)]
pub struct Signer<K: SigningCredential> {
    ctx: Context,
    resolver: CredentialResolver<K>,
    builder: Arc<dyn SignRequest<Credential = K>>,
}

impl<K: SigningCredential> Signer<K> {
    /// Create a new signer and start resolving credentials from `loader`.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(
        ctx: Context,
        loader: impl ProvideCredential<Credential = K>,
        builder: impl SignRequest<Credential = K>,
    ) -> Result<Self> {
        let resolver = CredentialResolver::spawn(ctx.clone(), loader)?;
        Ok(Self::with_resolver(ctx, resolver, builder))
    }

    /// Create a signer on top of an existing resolver.
    pub fn with_resolver(
        ctx: Context,
        resolver: CredentialResolver<K>,
        builder: impl SignRequest<Credential = K>,
    ) -> Self {
        Self {
            ctx,
            resolver,
            builder: Arc::new(builder),
        }
    }

    /// Sign the request in place.
    pub async fn sign(&self, req: &mut Parts) -> Result<()> {
        let credential = self.resolver.resolve().await?;
        if !credential.is_valid() {
            return Err(Error::credential_invalid(
                "resolved credential is not usable for signing",
            ));
        }

        self.builder
            .sign_request(&self.ctx, req, Some(credential.as_ref()))
            .await
    }
}
