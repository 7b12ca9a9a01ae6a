//! Solidity bindings for the contracts the vault deployer talks to.
//!
//! Only the external surface is described here: initializers, access-control accessors and the
//! owner-only entry points of the EIP-173 proxy. The contract sources live in the Hardhat project.

pub mod evm;
pub mod sol_types;
