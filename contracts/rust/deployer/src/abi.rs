//! ABI codec driven by human-readable function signatures.
//!
//! `FunctionSignature::parse("initialize(address,address[])")` canonicalizes the parameter types,
//! derives the 4-byte selector from the canonical form and encodes/decodes typed argument tuples
//! with the standard head/tail layout.

use alloy::{
    dyn_abi::{DynSolType, DynSolValue},
    primitives::{keccak256, Bytes, Selector},
};

use crate::error::AbiError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FunctionSignature {
    name: String,
    inputs: Vec<DynSolType>,
    canonical: String,
    selector: Selector,
}

impl FunctionSignature {
    /// Parse `name(type,...)`. Parameter names after a type (`address owner`) are ignored.
    pub fn parse(signature: &str) -> Result<Self, AbiError> {
        let signature = signature.trim();
        let (name, rest) = signature
            .split_once('(')
            .ok_or_else(|| AbiError::Encoding(format!("{signature:?} has no parameter list")))?;
        let params = rest
            .strip_suffix(')')
            .ok_or_else(|| AbiError::Encoding(format!("{signature:?} is not closed by ')'")))?;
        let name = name.trim();
        if name.is_empty()
            || name.starts_with(|c: char| c.is_ascii_digit())
            || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        {
            return Err(AbiError::Encoding(format!("invalid function name {name:?}")));
        }

        let inputs = split_top_level(params)?
            .into_iter()
            .map(|param| {
                let ty = param.split_whitespace().next().unwrap_or_default();
                DynSolType::parse(ty)
                    .map_err(|err| AbiError::Encoding(format!("unsupported type {ty:?}: {err}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let canonical = format!(
            "{name}({})",
            inputs
                .iter()
                .map(|ty| ty.sol_type_name().into_owned())
                .collect::<Vec<_>>()
                .join(",")
        );
        let selector = Selector::from_slice(&keccak256(canonical.as_bytes())[..4]);
        Ok(Self {
            name: name.to_string(),
            inputs,
            canonical,
            selector,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inputs(&self) -> &[DynSolType] {
        &self.inputs
    }

    /// `name(type1,type2)` with every type in its canonical spelling (`uint` -> `uint256`).
    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    pub fn selector(&self) -> Selector {
        self.selector
    }

    /// Selector followed by the ABI encoding of `args`.
    pub fn encode(&self, args: &[DynSolValue]) -> Result<Bytes, AbiError> {
        self.check_arguments(args)?;
        let encoded = DynSolValue::Tuple(args.to_vec()).abi_encode_params();
        let mut calldata = Vec::with_capacity(4 + encoded.len());
        calldata.extend_from_slice(self.selector.as_slice());
        calldata.extend_from_slice(&encoded);
        Ok(calldata.into())
    }

    /// Decode calldata produced by [`Self::encode`] back into the argument tuple.
    pub fn decode_input(&self, calldata: &[u8]) -> Result<Vec<DynSolValue>, AbiError> {
        let (selector, data) = calldata
            .split_first_chunk::<4>()
            .ok_or_else(|| AbiError::Decoding("calldata shorter than a selector".to_string()))?;
        if selector != &self.selector.0 {
            return Err(AbiError::Decoding(format!(
                "selector 0x{} does not match {}",
                alloy::hex::encode(selector),
                self.canonical
            )));
        }
        decode_params(&self.inputs, data)
    }

    fn check_arguments(&self, args: &[DynSolValue]) -> Result<(), AbiError> {
        if args.len() != self.inputs.len() {
            return Err(AbiError::TypeMismatch(format!(
                "{} takes {} arguments, got {}",
                self.canonical,
                self.inputs.len(),
                args.len()
            )));
        }
        for (position, (ty, value)) in self.inputs.iter().zip(args).enumerate() {
            if !ty.matches(value) {
                let found = value
                    .as_type()
                    .map(|found| found.sol_type_name().into_owned())
                    .unwrap_or_else(|| "an untyped value".to_string());
                return Err(AbiError::TypeMismatch(format!(
                    "argument {position} of {}: expected {}, got {found}",
                    self.canonical,
                    ty.sol_type_name()
                )));
            }
        }
        Ok(())
    }
}

/// Encode a call in one step.
pub fn encode_call(signature: &str, args: &[DynSolValue]) -> Result<Bytes, AbiError> {
    FunctionSignature::parse(signature)?.encode(args)
}

/// Decode the return data of a read call.
pub fn decode_output(outputs: &[DynSolType], data: &[u8]) -> Result<Vec<DynSolValue>, AbiError> {
    decode_params(outputs, data)
}

fn decode_params(types: &[DynSolType], data: &[u8]) -> Result<Vec<DynSolValue>, AbiError> {
    match DynSolType::Tuple(types.to_vec()).abi_decode_params(data) {
        Ok(DynSolValue::Tuple(values)) => Ok(values),
        Ok(other) => Ok(vec![other]),
        Err(err) => Err(AbiError::Decoding(err.to_string())),
    }
}

/// Split a parameter list on commas that are not nested inside a tuple type.
fn split_top_level(params: &str) -> Result<Vec<&str>, AbiError> {
    if params.trim().is_empty() {
        return Ok(vec![]);
    }
    let mut parts = vec![];
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in params.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth.checked_sub(1).ok_or_else(|| {
                    AbiError::Encoding(format!("unbalanced parentheses in ({params})"))
                })?
            },
            ',' if depth == 0 => {
                parts.push(params[start..i].trim());
                start = i + 1;
            },
            _ => {},
        }
    }
    if depth != 0 {
        return Err(AbiError::Encoding(format!(
            "unbalanced parentheses in ({params})"
        )));
    }
    parts.push(params[start..].trim());
    if parts.iter().any(|part| part.is_empty()) {
        return Err(AbiError::Encoding(format!("empty parameter in ({params})")));
    }
    Ok(parts)
}
