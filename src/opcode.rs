//! Operation alphabet and extended-operation codec
//!
//! The workload alphabet pairs a state-database operation with the kind
//! labels of its (address, key, value) argument slots. An extended operation
//! is encoded two ways, both bijective on the legal subset:
//!
//! - a compact integer `((op·6 + k_addr)·6 + k_key)·6 + k_val` in
//!   `[0, |Op|·216)`, used by the recorder's frequency tables;
//! - a mnemonic string (the 2-letter operation code followed by one kind
//!   letter per consumed slot, `z n p q r`, length `2 + arity`), used by the
//!   model files.
//!
//! Legality: exactly the first `arity(op)` kind slots are non-`NoArg`.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use crate::classifier::ArgKind;

/// Errors raised by the extended-operation codec.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("encoded operation {0} out of range")]
    OutOfRange(usize),
    #[error("kind {kind:?} illegal in slot {slot} of {op:?} (arity {arity})")]
    IllegalKind {
        op: Op,
        slot: usize,
        kind: ArgKind,
        arity: usize,
    },
    #[error("unknown operation code `{0}`")]
    UnknownOpCode(String),
    #[error("unknown argument-kind code `{0}`")]
    UnknownKindCode(char),
    #[error("mnemonic `{0}` has the wrong length for its operation")]
    MnemonicLength(String),
}

/// State-database operations observable by the workload model.
///
/// The discriminant order is stable; it defines the integer encoding and the
/// canonical order of the model's operation listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Op {
    AddBalance = 0,
    BeginBlock,
    BeginSyncPeriod,
    BeginTransaction,
    CreateAccount,
    CreateContract,
    GetCommittedState,
    EndBlock,
    Empty,
    EndSyncPeriod,
    EndTransaction,
    Exist,
    GetBalance,
    GetCode,
    GetCodeHash,
    GetNonce,
    GetState,
    GetTransientState,
    GetCodeSize,
    HasSelfDestructed,
    RevertToSnapshot,
    SubBalance,
    SetCode,
    SelfDestruct,
    SelfDestruct6780,
    SetNonce,
    Snapshot,
    SetState,
    SetTransientState,
}

impl Op {
    /// Number of operations in the alphabet.
    pub const COUNT: usize = 29;

    /// All operations in discriminant order.
    pub const ALL: [Op; Op::COUNT] = [
        Op::AddBalance,
        Op::BeginBlock,
        Op::BeginSyncPeriod,
        Op::BeginTransaction,
        Op::CreateAccount,
        Op::CreateContract,
        Op::GetCommittedState,
        Op::EndBlock,
        Op::Empty,
        Op::EndSyncPeriod,
        Op::EndTransaction,
        Op::Exist,
        Op::GetBalance,
        Op::GetCode,
        Op::GetCodeHash,
        Op::GetNonce,
        Op::GetState,
        Op::GetTransientState,
        Op::GetCodeSize,
        Op::HasSelfDestructed,
        Op::RevertToSnapshot,
        Op::SubBalance,
        Op::SetCode,
        Op::SelfDestruct,
        Op::SelfDestruct6780,
        Op::SetNonce,
        Op::Snapshot,
        Op::SetState,
        Op::SetTransientState,
    ];

    /// Decode a discriminant.
    pub fn from_index(i: usize) -> Option<Op> {
        Self::ALL.get(i).copied()
    }

    /// Stable 2-letter operation code used in mnemonics.
    pub fn code(self) -> &'static str {
        match self {
            Op::AddBalance => "AB",
            Op::BeginBlock => "BB",
            Op::BeginSyncPeriod => "BS",
            Op::BeginTransaction => "BT",
            Op::CreateAccount => "CA",
            Op::CreateContract => "CC",
            Op::GetCommittedState => "CS",
            Op::EndBlock => "EB",
            Op::Empty => "EM",
            Op::EndSyncPeriod => "ES",
            Op::EndTransaction => "ET",
            Op::Exist => "EX",
            Op::GetBalance => "GB",
            Op::GetCode => "GC",
            Op::GetCodeHash => "GH",
            Op::GetNonce => "GN",
            Op::GetState => "GS",
            Op::GetTransientState => "GT",
            Op::GetCodeSize => "GZ",
            Op::HasSelfDestructed => "HS",
            Op::RevertToSnapshot => "RS",
            Op::SubBalance => "SB",
            Op::SetCode => "SC",
            Op::SelfDestruct => "SD",
            Op::SelfDestruct6780 => "S6",
            Op::SetNonce => "SN",
            Op::Snapshot => "SP",
            Op::SetState => "SS",
            Op::SetTransientState => "ST",
        }
    }

    /// Inverse of [`Op::code`].
    pub fn from_code(code: &str) -> Option<Op> {
        Self::ALL.iter().copied().find(|op| op.code() == code)
    }

    /// How many of the (address, key, value) slots the operation consumes.
    pub fn arity(self) -> usize {
        match self {
            Op::BeginBlock
            | Op::BeginSyncPeriod
            | Op::BeginTransaction
            | Op::EndBlock
            | Op::EndSyncPeriod
            | Op::EndTransaction
            | Op::RevertToSnapshot
            | Op::Snapshot => 0,
            Op::AddBalance
            | Op::CreateAccount
            | Op::CreateContract
            | Op::Empty
            | Op::Exist
            | Op::GetBalance
            | Op::GetCode
            | Op::GetCodeHash
            | Op::GetNonce
            | Op::GetCodeSize
            | Op::HasSelfDestructed
            | Op::SubBalance
            | Op::SetCode
            | Op::SelfDestruct
            | Op::SelfDestruct6780
            | Op::SetNonce => 1,
            Op::GetCommittedState | Op::GetState | Op::GetTransientState => 2,
            Op::SetState | Op::SetTransientState => 3,
        }
    }

    /// Structural framing operations (sync-period / block / transaction
    /// boundaries).
    pub fn is_framing(self) -> bool {
        matches!(
            self,
            Op::BeginSyncPeriod
                | Op::EndSyncPeriod
                | Op::BeginBlock
                | Op::EndBlock
                | Op::BeginTransaction
                | Op::EndTransaction
        )
    }
}

/// An operation annotated with the kind labels of its three argument slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct XOp {
    pub op: Op,
    pub kinds: [ArgKind; 3],
}

/// Size of the integer encoding space: `|Op| · 6 · 6 · 6`.
pub const ENCODING_SPACE: usize =
    Op::COUNT * ArgKind::COUNT * ArgKind::COUNT * ArgKind::COUNT;

impl XOp {
    /// Build an extended operation, checking the arity legality rule.
    pub fn new(op: Op, kinds: [ArgKind; 3]) -> Result<XOp, CodecError> {
        let arity = op.arity();
        for (slot, &kind) in kinds.iter().enumerate() {
            let legal = if slot < arity {
                kind != ArgKind::NoArg
            } else {
                kind == ArgKind::NoArg
            };
            if !legal {
                return Err(CodecError::IllegalKind {
                    op,
                    slot,
                    kind,
                    arity,
                });
            }
        }
        Ok(XOp { op, kinds })
    }

    /// An arity-0 operation with all slots unused.
    pub fn nullary(op: Op) -> XOp {
        debug_assert_eq!(op.arity(), 0);
        XOp {
            op,
            kinds: [ArgKind::NoArg; 3],
        }
    }

    /// Integer encoding: `((op·6 + k_addr)·6 + k_key)·6 + k_val`.
    pub fn encode(self) -> usize {
        let [ka, kk, kv] = self.kinds;
        ((self.op as usize * ArgKind::COUNT + ka as usize) * ArgKind::COUNT + kk as usize)
            * ArgKind::COUNT
            + kv as usize
    }

    /// Invert [`XOp::encode`], re-checking legality.
    pub fn decode(code: usize) -> Result<XOp, CodecError> {
        if code >= ENCODING_SPACE {
            return Err(CodecError::OutOfRange(code));
        }
        let kv = ArgKind::from_index(code % ArgKind::COUNT).ok_or(CodecError::OutOfRange(code))?;
        let rest = code / ArgKind::COUNT;
        let kk = ArgKind::from_index(rest % ArgKind::COUNT).ok_or(CodecError::OutOfRange(code))?;
        let rest = rest / ArgKind::COUNT;
        let ka = ArgKind::from_index(rest % ArgKind::COUNT).ok_or(CodecError::OutOfRange(code))?;
        let op = Op::from_index(rest / ArgKind::COUNT).ok_or(CodecError::OutOfRange(code))?;
        XOp::new(op, [ka, kk, kv])
    }

    /// Mnemonic encoding: 2-letter op code + arity-many kind letters.
    pub fn mnemonic(self) -> String {
        let mut out = String::with_capacity(2 + self.op.arity());
        out.push_str(self.op.code());
        for &kind in self.kinds.iter().take(self.op.arity()) {
            // Legal XOps never carry NoArg inside the arity prefix.
            if let Some(c) = kind.code() {
                out.push(c);
            }
        }
        out
    }

    /// Parse a mnemonic produced by [`XOp::mnemonic`].
    pub fn parse_mnemonic(s: &str) -> Result<XOp, CodecError> {
        if !s.is_ascii() {
            return Err(CodecError::UnknownOpCode(s.to_string()));
        }
        if s.len() < 2 {
            return Err(CodecError::MnemonicLength(s.to_string()));
        }
        let (code, kinds_str) = s.split_at(2);
        let op = Op::from_code(code).ok_or_else(|| CodecError::UnknownOpCode(code.to_string()))?;
        if kinds_str.len() != op.arity() {
            return Err(CodecError::MnemonicLength(s.to_string()));
        }
        let mut kinds = [ArgKind::NoArg; 3];
        for (slot, c) in kinds_str.chars().enumerate() {
            kinds[slot] = ArgKind::from_code(c).ok_or(CodecError::UnknownKindCode(c))?;
        }
        XOp::new(op, kinds)
    }

    /// All legal extended operations, in encoding order.
    pub fn all_legal() -> Vec<XOp> {
        let mut out = Vec::new();
        for code in 0..ENCODING_SPACE {
            if let Ok(x) = XOp::decode(code) {
                out.push(x);
            }
        }
        out
    }
}
