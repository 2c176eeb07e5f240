// SPDX-License-Identifier: MIT OR Apache-2.0
//! SSH agent client.
//!
//! Speaks just enough of the agent protocol (RFC draft-miller-ssh-agent) to
//! request a signature: one `SSH_AGENTC_SIGN_REQUEST` per token. The agent is
//! found through `SSH_AUTH_SOCK`; key selection is by the public key the
//! caller configured, except for the OIDC exchange path, which adopts the
//! first identity the agent offers.

use crate::signer::JwtSigner;
use crate::AuthError;
use async_trait::async_trait;
use ssh_encoding::Decode;
use ssh_key::{Algorithm, PublicKey, Signature};
use std::path::PathBuf;

/// Agent message: list identities.
const SSH_AGENTC_REQUEST_IDENTITIES: u8 = 11;
/// Agent message: identities answer.
const SSH_AGENT_IDENTITIES_ANSWER: u8 = 12;
/// Agent message: sign request.
const SSH_AGENTC_SIGN_REQUEST: u8 = 13;
/// Agent message: sign response.
const SSH_AGENT_SIGN_RESPONSE: u8 = 14;
/// Agent message: generic failure.
const SSH_AGENT_FAILURE: u8 = 5;
/// Request flag selecting `rsa-sha2-256` for RSA keys.
const SSH_AGENT_RSA_SHA2_256: u32 = 2;

/// Signer that delegates to the user's SSH agent.
pub struct AgentSigner {
    socket: PathBuf,
    key: PublicKey,
}

impl AgentSigner {
    /// Bind to the agent at `SSH_AUTH_SOCK` for the given key.
    pub fn from_env(key: PublicKey) -> Result<Self, AuthError> {
        let socket = std::env::var_os("SSH_AUTH_SOCK").ok_or_else(|| AuthError::Agent {
            reason: "SSH_AUTH_SOCK is not set; is an ssh-agent running?".into(),
        })?;
        Ok(Self::new(PathBuf::from(socket), key))
    }

    /// Bind to an explicit agent socket.
    pub fn new(socket: PathBuf, key: PublicKey) -> Self {
        Self { socket, key }
    }

    /// Bind to the agent at `SSH_AUTH_SOCK`, adopting the first key it
    /// offers.
    ///
    /// Used by the OIDC exchange flow, where no public key is configured:
    /// the issuer, not this client, decides whether the offered key
    /// authenticates the subject.
    #[cfg(unix)]
    pub async fn from_env_first_identity() -> Result<Self, AuthError> {
        let socket = std::env::var_os("SSH_AUTH_SOCK").ok_or_else(|| AuthError::Agent {
            reason: "SSH_AUTH_SOCK is not set; is an ssh-agent running?".into(),
        })?;
        let socket = PathBuf::from(socket);

        let mut frame = Vec::with_capacity(5);
        frame.extend_from_slice(&1u32.to_be_bytes());
        frame.push(SSH_AGENTC_REQUEST_IDENTITIES);
        let payload = roundtrip(&socket, &frame).await?;

        if payload[0] != SSH_AGENT_IDENTITIES_ANSWER {
            return Err(AuthError::Agent {
                reason: format!("unexpected agent response type {}", payload[0]),
            });
        }
        let mut reader = &payload[1..];
        let count = u32::decode(&mut reader).map_err(|e| AuthError::Agent {
            reason: format!("malformed identities answer: {e}"),
        })?;
        if count == 0 {
            return Err(AuthError::Agent {
                reason: "agent holds no keys".into(),
            });
        }
        let blob = Vec::<u8>::decode(&mut reader).map_err(|e| AuthError::Agent {
            reason: format!("malformed identity blob: {e}"),
        })?;
        let comment = String::decode(&mut reader).map_err(|e| AuthError::Agent {
            reason: format!("malformed identity comment: {e}"),
        })?;

        let key_data = ssh_key::public::KeyData::decode(&mut blob.as_slice()).map_err(|e| {
            AuthError::BadPublicKey {
                reason: e.to_string(),
            }
        })?;
        Ok(Self::new(socket, PublicKey::new(key_data, comment)))
    }

    fn sign_request(&self, data: &[u8]) -> Result<Vec<u8>, AuthError> {
        let blob = self.key.to_bytes().map_err(|e| AuthError::Agent {
            reason: format!("cannot encode public key: {e}"),
        })?;
        let flags = match self.key.algorithm() {
            Algorithm::Rsa { .. } => SSH_AGENT_RSA_SHA2_256,
            _ => 0,
        };

        let mut body = Vec::with_capacity(1 + 8 + blob.len() + data.len() + 4);
        body.push(SSH_AGENTC_SIGN_REQUEST);
        put_string(&mut body, &blob);
        put_string(&mut body, data);
        body.extend_from_slice(&flags.to_be_bytes());

        let mut frame = Vec::with_capacity(4 + body.len());
        frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
        frame.extend_from_slice(&body);
        Ok(frame)
    }
}

#[async_trait]
impl JwtSigner for AgentSigner {
    fn public_key(&self) -> &PublicKey {
        &self.key
    }

    #[cfg(unix)]
    async fn sign(&self, data: &[u8]) -> Result<Signature, AuthError> {
        let frame = self.sign_request(data)?;
        let payload = roundtrip(&self.socket, &frame).await?;

        match payload[0] {
            SSH_AGENT_SIGN_RESPONSE => {
                let mut reader = &payload[1..];
                // The response wraps the wire signature in one more string.
                let inner = Vec::<u8>::decode(&mut reader).map_err(|e| AuthError::Agent {
                    reason: format!("malformed sign response: {e}"),
                })?;
                let mut inner_reader = inner.as_slice();
                Signature::decode(&mut inner_reader).map_err(|e| AuthError::Agent {
                    reason: format!("malformed signature in response: {e}"),
                })
            }
            SSH_AGENT_FAILURE => Err(AuthError::Agent {
                reason: "agent refused to sign (is the key loaded?)".into(),
            }),
            other => Err(AuthError::Agent {
                reason: format!("unexpected agent response type {other}"),
            }),
        }
    }

    #[cfg(not(unix))]
    async fn sign(&self, _data: &[u8]) -> Result<Signature, AuthError> {
        Err(AuthError::Agent {
            reason: "ssh-agent signing is only supported on unix hosts".into(),
        })
    }
}

fn put_string(buf: &mut Vec<u8>, s: &[u8]) {
    buf.extend_from_slice(&(s.len() as u32).to_be_bytes());
    buf.extend_from_slice(s);
}

/// One framed request/response exchange with the agent.
#[cfg(unix)]
async fn roundtrip(socket: &std::path::Path, frame: &[u8]) -> Result<Vec<u8>, AuthError> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UnixStream;

    let mut stream = UnixStream::connect(socket)
        .await
        .map_err(|e| AuthError::Agent {
            reason: format!("cannot connect to agent at {}: {e}", socket.display()),
        })?;

    stream.write_all(frame).await.map_err(agent_io)?;

    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await.map_err(agent_io)?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len == 0 || len > 1024 * 1024 {
        return Err(AuthError::Agent {
            reason: format!("implausible agent response length {len}"),
        });
    }
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await.map_err(agent_io)?;
    Ok(payload)
}

#[cfg(unix)]
fn agent_io(e: std::io::Error) -> AuthError {
    AuthError::Agent {
        reason: format!("agent i/o failed: {e}"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_PUB: &str = include_str!("../tests/fixtures/id_ed25519.pub");

    fn key() -> PublicKey {
        PublicKey::from_openssh(TEST_PUB).unwrap()
    }

    #[test]
    fn sign_request_frames_key_data_and_flags() {
        let signer = AgentSigner::new(PathBuf::from("/tmp/sock"), key());
        let frame = signer.sign_request(b"data").unwrap();

        let body_len = u32::from_be_bytes(frame[..4].try_into().unwrap()) as usize;
        assert_eq!(body_len, frame.len() - 4);
        assert_eq!(frame[4], SSH_AGENTC_SIGN_REQUEST);

        let blob_len = u32::from_be_bytes(frame[5..9].try_into().unwrap()) as usize;
        let after_blob = 9 + blob_len;
        let data_len =
            u32::from_be_bytes(frame[after_blob..after_blob + 4].try_into().unwrap()) as usize;
        assert_eq!(&frame[after_blob + 4..after_blob + 4 + data_len], b"data");

        // Trailing flags: zero for ed25519.
        assert_eq!(&frame[frame.len() - 4..], &[0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn unreachable_socket_is_an_agent_error() {
        let signer = AgentSigner::new(PathBuf::from("/nonexistent/agent.sock"), key());
        let err = signer.sign(b"data").await.unwrap_err();
        assert!(matches!(err, AuthError::Agent { .. }));
    }

    #[test]
    fn missing_env_is_reported() {
        // Only meaningful when no agent is configured in the environment;
        // skip quietly otherwise.
        if std::env::var_os("SSH_AUTH_SOCK").is_none() {
            assert!(AgentSigner::from_env(key()).is_err());
        }
    }

    /// A minimal in-process agent speaking just enough protocol for one
    /// connection: identities answer or a signature from the test key.
    #[cfg(unix)]
    async fn fake_agent(listener: tokio::net::UnixListener) {
        use crate::signer::{JwtSigner, LocalKeySigner};
        use ssh_encoding::Encode;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let signer = LocalKeySigner::from_openssh(include_str!(
            "../tests/fixtures/id_ed25519"
        ))
        .unwrap();

        let (mut stream, _) = listener.accept().await.unwrap();
        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).await.unwrap();
        let mut request = vec![0u8; u32::from_be_bytes(len_buf) as usize];
        stream.read_exact(&mut request).await.unwrap();

        let mut body = Vec::new();
        match request[0] {
            SSH_AGENTC_REQUEST_IDENTITIES => {
                body.push(SSH_AGENT_IDENTITIES_ANSWER);
                body.extend_from_slice(&1u32.to_be_bytes());
                put_string(&mut body, &signer.public_key().to_bytes().unwrap());
                put_string(&mut body, b"test-key");
            }
            SSH_AGENTC_SIGN_REQUEST => {
                let mut reader = &request[1..];
                let _blob = Vec::<u8>::decode(&mut reader).unwrap();
                let data = Vec::<u8>::decode(&mut reader).unwrap();
                let signature = signer.sign(&data).await.unwrap();
                let mut wire = Vec::new();
                signature.encode(&mut wire).unwrap();
                body.push(SSH_AGENT_SIGN_RESPONSE);
                put_string(&mut body, &wire);
            }
            other => panic!("unexpected agent request {other}"),
        }

        let mut frame = Vec::with_capacity(4 + body.len());
        frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
        frame.extend_from_slice(&body);
        stream.write_all(&frame).await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn sign_round_trips_through_a_real_socket() {
        use signature::Verifier as _;

        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("agent.sock");
        let listener = tokio::net::UnixListener::bind(&socket).unwrap();
        let server = tokio::spawn(fake_agent(listener));

        let signer = AgentSigner::new(socket, key());
        let signature = signer.sign(b"header.claims").await.unwrap();
        signer
            .public_key()
            .key_data()
            .verify(b"header.claims", &signature)
            .unwrap();

        server.await.unwrap();
    }
}
