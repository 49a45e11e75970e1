use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use num_traits::ToPrimitive;
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use strata_crypto::signing::{sign_payload, verify_payload};
use uuid::Uuid;

use super::errors::CodecError;
use super::split_frame;

/// A signed transfer of opaque bytes, identified by a random UUID.
///
/// The canonical form is `<base64(JSON payload)>.<hex(signature)>`; the
/// signature covers the base64 payload text, so re-serialization of a decoded
/// transaction reproduces exactly the bytes the sender signed.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub id: Uuid,
    /// RSA public key of the sender, embedded as (n, e) in the payload
    pub public_key: RsaPublicKey,
    /// reserved; carried but unused
    pub cost: u64,
    pub data: Vec<u8>,
    /// detached PKCS#1 v1.5 signature over the canonical payload
    pub signature: Option<Vec<u8>>,
}

/// The JSON payload. Field order here IS the canonical order; the digest that
/// gets signed depends on it.
#[derive(Serialize, Deserialize)]
struct TransactionPayload {
    id: Uuid,
    public_key: PublicKeyRepr,
    cost: u64,
    data: String,
}

#[derive(Serialize, Deserialize)]
struct PublicKeyRepr {
    /// modulus as a decimal string
    n: String,
    /// public exponent
    e: u32,
}

impl Transaction {
    pub fn new(public_key: RsaPublicKey, cost: u64, data: Vec<u8>) -> Self {
        Transaction {
            id: Uuid::new_v4(),
            public_key,
            cost,
            data,
            signature: None,
        }
    }

    /// The canonical payload: base64 of the payload JSON. This exact text is
    /// what gets hashed and signed.
    pub fn serialize_payload(&self) -> Result<String, CodecError> {
        let e = self.public_key.e().to_u32().ok_or_else(|| {
            CodecError::MalformedJson("public exponent does not fit in 32 bits".into())
        })?;
        let payload = TransactionPayload {
            id: self.id,
            public_key: PublicKeyRepr {
                n: self.public_key.n().to_str_radix(10),
                e,
            },
            cost: self.cost,
            data: BASE64.encode(&self.data),
        };
        let json = serde_json::to_vec(&payload)
            .map_err(|e| CodecError::MalformedJson(e.to_string()))?;
        Ok(BASE64.encode(json))
    }

    /// Signs the canonical payload with the sender's private key.
    pub fn sign(&mut self, key: &RsaPrivateKey) -> Result<(), CodecError> {
        let payload = self.serialize_payload()?;
        let signature = sign_payload(key, payload.as_bytes())
            .map_err(|e| CodecError::SigningFailed(e.to_string()))?;
        self.signature = Some(signature);
        Ok(())
    }

    /// Checks the detached signature against the embedded public key.
    /// An unsigned transaction never verifies.
    pub fn verify(&self) -> Result<bool, CodecError> {
        let signature = match &self.signature {
            Some(signature) => signature,
            None => return Ok(false),
        };
        let payload = self.serialize_payload()?;
        Ok(verify_payload(
            &self.public_key,
            payload.as_bytes(),
            signature,
        ))
    }

    pub fn encode(&self) -> Result<String, CodecError> {
        let signature = self
            .signature
            .as_ref()
            .ok_or(CodecError::UnsignedTransaction)?;
        let payload = self.serialize_payload()?;
        Ok(format!("{}.{}", payload, hex::encode(signature)))
    }

    pub fn decode(text: &str) -> Result<Self, CodecError> {
        let (payload_part, tail) = split_frame(text)?;
        let payload_bytes = BASE64
            .decode(payload_part)
            .map_err(|e| CodecError::MalformedFrame(format!("payload is not base64: {e}")))?;
        let signature = hex::decode(tail)
            .map_err(|e| CodecError::MalformedFrame(format!("signature is not hex: {e}")))?;
        let payload: TransactionPayload = serde_json::from_slice(&payload_bytes)
            .map_err(|e| CodecError::MalformedJson(e.to_string()))?;

        let n = BigUint::parse_bytes(payload.public_key.n.as_bytes(), 10).ok_or_else(|| {
            CodecError::MalformedJson(format!(
                "cannot parse '{}' as a modulus",
                payload.public_key.n
            ))
        })?;
        let public_key = RsaPublicKey::new(n, BigUint::from(payload.public_key.e))
            .map_err(|e| CodecError::MalformedJson(format!("invalid public key: {e}")))?;
        let data = BASE64
            .decode(&payload.data)
            .map_err(|e| CodecError::MalformedJson(format!("data is not base64: {e}")))?;

        Ok(Transaction {
            id: payload.id,
            public_key,
            cost: payload.cost,
            data,
            signature: Some(signature),
        })
    }
}
