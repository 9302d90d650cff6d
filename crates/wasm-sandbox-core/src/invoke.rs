//! Export table and word conversion for the invocation dispatcher.
//!
//! Exports are resolved through an [`ExportTable`] built once per compiled
//! module: a plain map from export name to [`FuncSignature`]. A miss is a
//! [`SandboxError::FunctionNotFound`]; a signature the caller's words cannot
//! satisfy is a [`SandboxError::ArgumentMismatch`]. Neither runs guest code.
//!
//! Words map onto wasm values as follows:
//!
//! | type  | word -> value                      | value -> word          |
//! |-------|------------------------------------|------------------------|
//! | `i32` | must fit in 32 bits, bit pattern   | bit pattern, zero-extended |
//! | `i64` | bit pattern                        | bit pattern            |
//! | `f32` | must fit in 32 bits, IEEE-754 bits | bits, zero-extended    |
//! | `f64` | IEEE-754 bits                      | IEEE-754 bits          |

use std::collections::HashMap;
use std::fmt;

use wasmtime::{ExternType, FuncType, Module, Val, ValType};

use wasm_sandbox_common::{SandboxError, Word};

/// Value type of a parameter or result, as seen by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WordType {
    I32,
    I64,
    F32,
    F64,
    /// A type that has no word representation (`v128`, references).
    Unsupported(String),
}

impl WordType {
    fn from_val_type(ty: &ValType) -> Self {
        match ty {
            ValType::I32 => Self::I32,
            ValType::I64 => Self::I64,
            ValType::F32 => Self::F32,
            ValType::F64 => Self::F64,
            other => Self::Unsupported(format!("{other:?}")),
        }
    }

    /// Convert a word into a wasm value of this type.
    #[allow(clippy::cast_possible_wrap)]
    fn encode(&self, word: Word) -> Result<Val, String> {
        match self {
            Self::I32 => u32::try_from(word)
                .map(|bits| Val::I32(bits as i32))
                .map_err(|_| format!("{word:#x} does not fit in i32")),
            Self::I64 => Ok(Val::I64(word as i64)),
            Self::F32 => u32::try_from(word)
                .map(Val::F32)
                .map_err(|_| format!("{word:#x} does not fit in f32")),
            Self::F64 => Ok(Val::F64(word)),
            Self::Unsupported(ty) => Err(format!("type {ty} has no word representation")),
        }
    }

    /// Placeholder value used as a result slot.
    fn zero(&self) -> Option<Val> {
        match self {
            Self::I32 => Some(Val::I32(0)),
            Self::I64 => Some(Val::I64(0)),
            Self::F32 => Some(Val::F32(0)),
            Self::F64 => Some(Val::F64(0)),
            Self::Unsupported(_) => None,
        }
    }
}

impl fmt::Display for WordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::I32 => f.write_str("i32"),
            Self::I64 => f.write_str("i64"),
            Self::F32 => f.write_str("f32"),
            Self::F64 => f.write_str("f64"),
            Self::Unsupported(ty) => f.write_str(ty),
        }
    }
}

/// Declared signature of an exported function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuncSignature {
    pub params: Vec<WordType>,
    pub results: Vec<WordType>,
}

impl FuncSignature {
    fn from_func_type(ty: &FuncType) -> Self {
        Self {
            params: ty.params().map(|p| WordType::from_val_type(&p)).collect(),
            results: ty.results().map(|r| WordType::from_val_type(&r)).collect(),
        }
    }

    /// Returns `true` for a `() -> ()` signature.
    pub fn is_nullary(&self) -> bool {
        self.params.is_empty() && self.results.is_empty()
    }

    /// Convert caller words into wasm arguments.
    pub fn encode_args(&self, function: &str, args: &[Word]) -> Result<Vec<Val>, SandboxError> {
        if args.len() != self.params.len() {
            return Err(SandboxError::argument_mismatch(
                function,
                format!(
                    "expected {} argument(s), got {}",
                    self.params.len(),
                    args.len()
                ),
            ));
        }

        self.params
            .iter()
            .zip(args)
            .enumerate()
            .map(|(index, (ty, &word))| {
                ty.encode(word).map_err(|reason| {
                    SandboxError::argument_mismatch(function, format!("argument {index}: {reason}"))
                })
            })
            .collect()
    }

    /// Allocate result slots, rejecting result types with no word form.
    pub fn result_slots(&self, function: &str) -> Result<Vec<Val>, SandboxError> {
        self.results
            .iter()
            .enumerate()
            .map(|(index, ty)| {
                ty.zero().ok_or_else(|| {
                    SandboxError::argument_mismatch(
                        function,
                        format!("result {index}: type {ty} has no word representation"),
                    )
                })
            })
            .collect()
    }
}

/// Convert returned wasm values into words, in declaration order.
#[allow(clippy::cast_sign_loss)]
pub fn decode_results(function: &str, values: &[Val]) -> Result<Vec<Word>, SandboxError> {
    values
        .iter()
        .enumerate()
        .map(|(index, value)| match value {
            Val::I32(v) => Ok(Word::from(*v as u32)),
            Val::I64(v) => Ok(*v as u64),
            Val::F32(bits) => Ok(Word::from(*bits)),
            Val::F64(bits) => Ok(*bits),
            _ => Err(SandboxError::argument_mismatch(
                function,
                format!("result {index} has no word representation"),
            )),
        })
        .collect()
}

/// Name-to-signature table of a module's exported functions.
#[derive(Debug, Clone, Default)]
pub struct ExportTable {
    functions: HashMap<String, FuncSignature>,
}

impl ExportTable {
    /// Build the table from a compiled module's exports.
    pub fn from_module(module: &Module) -> Self {
        let functions = module
            .exports()
            .filter_map(|export| match export.ty() {
                ExternType::Func(ty) => {
                    Some((export.name().to_string(), FuncSignature::from_func_type(&ty)))
                }
                _ => None,
            })
            .collect();

        Self { functions }
    }

    /// Look up an exported function by name.
    pub fn get(&self, name: &str) -> Option<&FuncSignature> {
        self.functions.get(name)
    }

    /// Look up an exported function, failing with `FunctionNotFound`.
    pub fn resolve(&self, name: &str) -> Result<&FuncSignature, SandboxError> {
        self.get(name)
            .ok_or_else(|| SandboxError::function_not_found(name))
    }

    /// Names of all exported functions, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of exported functions.
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Returns `true` if the module exports no functions.
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}
