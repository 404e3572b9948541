//! Diffie-Hellman key agreement.
//!
//! One [`Session`] exists per (local node, peer address) pair and walks a
//! two-step handshake: the initiator sends `{step:1, p, g, A}`, the
//! responder answers `{step:2, B}`, and both sides end up holding the same
//! shared secret. Steps travel as plaintext JSON under the `Exchange`
//! purpose. The group parameters are deliberately tiny (primes below
//! [`PRIME_MAX`]) so the O(p²) primitive-root search stays cheap; the
//! scheme bootstraps key wrapping, not long-term confidentiality.

use crate::types::{KEY_MAX, KEY_MIN, PRIME_MAX, PRIME_MIN};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

/// Errors produced while driving a handshake.
///
/// Any error abandons the session; there is no retry within a session.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// No prime exists in the configured bounds.
    #[error("no prime in range [{lo}, {hi})")]
    NoPrimeInRange {
        /// Inclusive lower bound.
        lo: u64,
        /// Exclusive upper bound.
        hi: u64,
    },
    /// The modulus admits no primitive root.
    #[error("no primitive root modulo {0}")]
    NoPrimitiveRoot(u64),
    /// A step arrived that the session's state does not expect.
    #[error("handshake out of order: expected step {expected}, got step {got}")]
    OutOfOrder {
        /// Step the session was waiting for.
        expected: u8,
        /// Step that actually arrived.
        got: u8,
    },
    /// The payload names a step the protocol does not define.
    #[error("unknown handshake step {0}")]
    UnknownStep(u8),
    /// The step payload is not valid JSON of the expected shape.
    #[error("malformed handshake payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Computes `base^exp mod modulus` by square-and-multiply.
///
/// Intermediate products are widened to `u128`, so any `u64` modulus is
/// safe from overflow.
#[must_use]
pub fn mod_pow(base: u64, mut exp: u64, modulus: u64) -> u64 {
    if modulus == 1 {
        return 0;
    }
    let modulus = u128::from(modulus);
    let mut base = u128::from(base) % modulus;
    let mut acc: u128 = 1;
    while exp > 0 {
        if exp & 1 == 1 {
            acc = acc * base % modulus;
        }
        base = base * base % modulus;
        exp >>= 1;
    }
    acc as u64
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Trial-division primality test; adequate for the bounded key range.
#[must_use]
pub fn is_prime(n: u64) -> bool {
    if n < 2 {
        return false;
    }
    let mut d = 2;
    while d * d <= n {
        if n % d == 0 {
            return false;
        }
        d += 1;
    }
    true
}

/// Picks a uniformly random prime from `[lo, hi)`.
///
/// # Errors
///
/// Returns [`HandshakeError::NoPrimeInRange`] if the range holds no prime.
pub fn random_prime(rng: &mut impl Rng, lo: u64, hi: u64) -> Result<u64, HandshakeError> {
    let primes: Vec<u64> = (lo..hi).filter(|&n| is_prime(n)).collect();
    if primes.is_empty() {
        return Err(HandshakeError::NoPrimeInRange { lo, hi });
    }
    Ok(primes[rng.gen_range(0..primes.len())])
}

/// Finds a primitive root of `p`: a candidate whose powers `m^1 .. m^(p-1)`
/// mod `p` cover exactly the integers coprime to `p`.
///
/// Candidates are tried in ascending order and the **last** match wins;
/// the tie-break is part of the protocol's reproducibility contract.
/// O(p²), intended for small moduli only.
#[must_use]
pub fn primitive_root(p: u64) -> Option<u64> {
    if p < 2 {
        return None;
    }
    let coprimes: BTreeSet<u64> = (1..p).filter(|&m| gcd(m, p) == 1).collect();
    let mut root = None;
    for candidate in 1..p {
        let powers: BTreeSet<u64> = (1..p).map(|i| mod_pow(candidate, i, p)).collect();
        if powers == coprimes {
            root = Some(candidate);
        }
    }
    root
}

/// Handshake step 1, sent by the initiator: group parameters and the
/// initiator's public value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step1 {
    /// Always 1.
    pub step: u8,
    /// Prime modulus.
    pub p: u64,
    /// Primitive root of `p`.
    pub g: u64,
    /// Initiator's public value `g^a mod p`.
    #[serde(rename = "A")]
    pub a_pub: u64,
}

/// Handshake step 2, sent by the responder: the responder's public value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step2 {
    /// Always 2.
    pub step: u8,
    /// Responder's public value `g^b mod p`.
    #[serde(rename = "B")]
    pub b_pub: u64,
}

/// A parsed handshake payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepPayload {
    /// Step 1 from an initiator.
    One(Step1),
    /// Step 2 from a responder.
    Two(Step2),
}

/// Parses the JSON body of an `Exchange` message.
///
/// # Errors
///
/// Returns [`HandshakeError::Payload`] on malformed JSON and
/// [`HandshakeError::UnknownStep`] for step numbers other than 1 or 2.
pub fn parse_step(json: &str) -> Result<StepPayload, HandshakeError> {
    let value: serde_json::Value = serde_json::from_str(json)?;
    let step = value
        .get("step")
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(0);
    match step {
        1 => Ok(StepPayload::One(serde_json::from_value(value)?)),
        2 => Ok(StepPayload::Two(serde_json::from_value(value)?)),
        other => Err(HandshakeError::UnknownStep(other.min(255) as u8)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Initiator: step 1 sent, waiting for step 2.
    Step1Sent,
    /// Responder: step 1 received and step 2 sent; secret already known.
    Step2Sent,
    /// Both public values seen; shared secret computed.
    Complete,
}

/// Per-peer handshake state.
///
/// Created by [`Session::initiate`] or [`Session::respond`], held by the
/// owning node keyed by peer address, and dropped once the shared secret
/// has been consumed.
#[derive(Debug)]
pub struct Session {
    p: u64,
    secret_exp: u64,
    state: State,
    shared: Option<u64>,
}

impl Session {
    /// Starts a handshake as initiator: picks `p`, `g`, and a secret
    /// exponent, and returns the session with the step-1 payload to send.
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError`] if the default prime range is empty or
    /// the chosen modulus has no primitive root.
    pub fn initiate(rng: &mut impl Rng) -> Result<(Self, Step1), HandshakeError> {
        Self::initiate_with_bounds(rng, PRIME_MIN, PRIME_MAX)
    }

    /// [`Session::initiate`] with explicit prime bounds.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Session::initiate`].
    pub fn initiate_with_bounds(
        rng: &mut impl Rng,
        prime_lo: u64,
        prime_hi: u64,
    ) -> Result<(Self, Step1), HandshakeError> {
        let p = random_prime(rng, prime_lo, prime_hi)?;
        let g = primitive_root(p).ok_or(HandshakeError::NoPrimitiveRoot(p))?;
        let a = rng.gen_range(KEY_MIN..KEY_MAX);
        Ok(Self::initiator_with(p, g, a))
    }

    fn initiator_with(p: u64, g: u64, a: u64) -> (Self, Step1) {
        let a_pub = mod_pow(g, a, p);
        let session = Self {
            p,
            secret_exp: a,
            state: State::Step1Sent,
            shared: None,
        };
        (session, Step1 { step: 1, p, g, a_pub })
    }

    /// Answers an incoming step 1 as responder: picks a secret exponent,
    /// computes the shared secret immediately, and returns the session
    /// with the step-2 payload to send back.
    #[must_use]
    pub fn respond(step1: &Step1, rng: &mut impl Rng) -> (Self, Step2) {
        let b = rng.gen_range(KEY_MIN..KEY_MAX);
        Self::responder_with(step1, b)
    }

    fn responder_with(step1: &Step1, b: u64) -> (Self, Step2) {
        let b_pub = mod_pow(step1.g, b, step1.p);
        let shared = mod_pow(step1.a_pub, b, step1.p);
        let session = Self {
            p: step1.p,
            secret_exp: b,
            state: State::Step2Sent,
            shared: Some(shared),
        };
        (session, Step2 { step: 2, b_pub })
    }

    /// Completes the handshake on the initiator side with the peer's
    /// step-2 payload, returning the shared secret.
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError::OutOfOrder`] if this session is not an
    /// initiator waiting for step 2.
    pub fn complete(&mut self, step2: &Step2) -> Result<u64, HandshakeError> {
        if self.state != State::Step1Sent {
            return Err(HandshakeError::OutOfOrder {
                expected: 1,
                got: step2.step,
            });
        }
        let shared = mod_pow(step2.b_pub, self.secret_exp, self.p);
        self.shared = Some(shared);
        self.state = State::Complete;
        Ok(shared)
    }

    /// The shared secret, if this side has computed it.
    #[must_use]
    pub fn shared_secret(&self) -> Option<u64> {
        self.shared
    }
}
