//! Generated credentials shared by every member of a deployment.

use std::collections::BTreeMap;
use std::sync::Mutex;

use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::Result;

const ALPHANUMERIC: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const HEX: &[u8] = b"abcdef0123456789";
const SECRET_LEN: usize = 24;
const HEC_TOKEN_LEN: usize = 36;
const HEC_TOKEN_DASHES: [usize; 4] = [8, 13, 18, 23];

pub const HEC_TOKEN: &str = "hec_token";
pub const PASSWORD: &str = "password";
pub const PASS4_SYMM_KEY: &str = "pass4SymmKey";
pub const IDXC_SECRET: &str = "idxc_secret";
pub const SHC_SECRET: &str = "shc_secret";
pub const DEFAULT_YML: &str = "default.yml";

/// Source of random bytes for generated credentials.
pub trait SecretSource: Send + Sync {
    /// `len` bytes drawn uniformly from `alphabet`.
    fn generate(&self, alphabet: &[u8], len: usize) -> Vec<u8>;
}

/// Thread-local CSPRNG, used in production.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRngSource;

impl SecretSource for ThreadRngSource {
    fn generate(&self, alphabet: &[u8], len: usize) -> Vec<u8> {
        let mut rng = rand::rng();
        (0..len)
            .map(|_| alphabet[rng.random_range(0..alphabet.len())])
            .collect()
    }
}

/// Deterministic source for tests.
#[derive(Debug)]
pub struct SeededSource(Mutex<StdRng>);

impl SeededSource {
    pub fn new(seed: u64) -> Self {
        Self(Mutex::new(StdRng::seed_from_u64(seed)))
    }
}

impl SecretSource for SeededSource {
    fn generate(&self, alphabet: &[u8], len: usize) -> Vec<u8> {
        let mut rng = match self.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        (0..len)
            .map(|_| alphabet[rng.random_range(0..alphabet.len())])
            .collect()
    }
}

fn generate_secret(source: &dyn SecretSource) -> Vec<u8> {
    source.generate(ALPHANUMERIC, SECRET_LEN)
}

/// Random hex laid out like a UUID. Not a real UUID.
fn generate_hec_token(source: &dyn SecretSource) -> Vec<u8> {
    let mut token = source.generate(HEX, HEC_TOKEN_LEN);
    for i in HEC_TOKEN_DASHES {
        token[i] = b'-';
    }
    token
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretBundle {
    pub hec_token: Vec<u8>,
    pub password: Vec<u8>,
    pub pass4_symm_key: Vec<u8>,
    pub idxc_secret: Vec<u8>,
    pub shc_secret: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
struct DefaultsDocument {
    splunk: SplunkDefaults,
}

#[derive(Debug, Serialize, Deserialize)]
struct SplunkDefaults {
    hec_disabled: u8,
    #[serde(rename = "hec_enableSSL")]
    hec_enable_ssl: u8,
    hec_token: String,
    password: String,
    #[serde(rename = "pass4SymmKey")]
    pass4_symm_key: String,
    idxc: SharedSecret,
    shc: SharedSecret,
}

#[derive(Debug, Serialize, Deserialize)]
struct SharedSecret {
    secret: String,
}

fn text(value: &[u8]) -> String {
    String::from_utf8_lossy(value).into_owned()
}

impl SecretBundle {
    /// The bootstrap `default.yml` embedding every credential.
    pub fn default_yml(&self) -> Result<String> {
        let doc = DefaultsDocument {
            splunk: SplunkDefaults {
                hec_disabled: 0,
                hec_enable_ssl: 0,
                hec_token: text(&self.hec_token),
                password: text(&self.password),
                pass4_symm_key: text(&self.pass4_symm_key),
                idxc: SharedSecret {
                    secret: text(&self.idxc_secret),
                },
                shc: SharedSecret {
                    secret: text(&self.shc_secret),
                },
            },
        };
        Ok(serde_yaml::to_string(&doc)?)
    }

    pub fn to_data(&self) -> Result<BTreeMap<String, ByteString>> {
        Ok(BTreeMap::from([
            (HEC_TOKEN.into(), ByteString(self.hec_token.clone())),
            (PASSWORD.into(), ByteString(self.password.clone())),
            (PASS4_SYMM_KEY.into(), ByteString(self.pass4_symm_key.clone())),
            (IDXC_SECRET.into(), ByteString(self.idxc_secret.clone())),
            (SHC_SECRET.into(), ByteString(self.shc_secret.clone())),
            (DEFAULT_YML.into(), ByteString(self.default_yml()?.into_bytes())),
        ]))
    }
}

/// Value stored under `key` in a live secret, if any.
pub fn secret_value(secret: &Secret, key: &str) -> Option<Vec<u8>> {
    secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .map(|v| v.0.clone())
        .filter(|v| !v.is_empty())
}

/// Credentials for one deployment. Values already stored in `existing` are
/// kept; missing ones are generated. `cluster_secret` replaces `idxc_secret`
/// so that a tier can join another cluster's secret domain.
pub fn ensure_secrets(
    existing: Option<&Secret>,
    cluster_secret: Option<&[u8]>,
    source: &dyn SecretSource,
) -> SecretBundle {
    let keep = |key: &str| existing.and_then(|s| secret_value(s, key));
    SecretBundle {
        hec_token: keep(HEC_TOKEN).unwrap_or_else(|| generate_hec_token(source)),
        password: keep(PASSWORD).unwrap_or_else(|| generate_secret(source)),
        pass4_symm_key: keep(PASS4_SYMM_KEY).unwrap_or_else(|| generate_secret(source)),
        idxc_secret: cluster_secret
            .filter(|s| !s.is_empty())
            .map(<[u8]>::to_vec)
            .or_else(|| keep(IDXC_SECRET))
            .unwrap_or_else(|| generate_secret(source)),
        shc_secret: keep(SHC_SECRET).unwrap_or_else(|| generate_secret(source)),
    }
}
