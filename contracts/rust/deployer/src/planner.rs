//! Initialization and role-grant calldata.
//!
//! Role identifiers are opaque: they are read from the contract's accessor (`MONEY_VAULT_ROLE()`,
//! `ADMIN_ROLE()`, ...) and compared byte for byte. The only value known statically is the default
//! admin role, the zero word.

use std::{fmt, str::FromStr};

use alloy::{
    dyn_abi::{DynSolType, DynSolValue},
    primitives::{Address, Bytes, TxHash, B256},
    sol_types::SolCall,
};
use vault_contract_adapter::{
    evm::is_access_control_unauthorized, sol_types::IAccessControl,
};

use crate::{
    abi::{decode_output, FunctionSignature},
    chain::{call_view, send_and_confirm, ChainClient, FinalityPolicy, TxRequest},
    config::DeploymentConfig,
    error::{AbiError, ConfigError, DeployError},
};

pub const MARKET_MAKER_VAULT_INIT_SIGNATURE: &str = "initialize(address,address)";
/// Selector of `initialize(address,address)`.
pub const MARKET_MAKER_VAULT_INIT_SELECTOR: [u8; 4] = [0x48, 0x5c, 0xc9, 0x55];
pub const MONEY_VAULT_INIT_SIGNATURE: &str =
    "initialize(address,address,address,address,address,address[])";

pub const MONEY_VAULT_ROLE: &str = "MONEY_VAULT_ROLE";
pub const ADMIN_ROLE: &str = "ADMIN_ROLE";
pub const BOT_ROLE: &str = "BOT_ROLE";
pub const DEFAULT_ADMIN_ROLE: &str = "DEFAULT_ADMIN_ROLE";

/// An encoded call waiting to be executed, by a proxy constructor or an upgrade.
///
/// It is consumed by [`InitializationCall::into_calldata`], so it can be used once.
#[derive(Clone, Debug, PartialEq)]
pub struct InitializationCall {
    pub signature: String,
    pub arguments: Vec<DynSolValue>,
    calldata: Bytes,
}

impl InitializationCall {
    pub fn calldata(&self) -> &Bytes {
        &self.calldata
    }

    pub fn into_calldata(self) -> Bytes {
        self.calldata
    }
}

/// `initialize(asset, owner)` of the market-maker vault.
pub fn plan_market_maker_init(config: &DeploymentConfig) -> InitializationCall {
    let arguments = vec![
        DynSolValue::Address(config.asset),
        DynSolValue::Address(config.owner),
    ];
    let encoded = DynSolValue::Tuple(arguments.clone()).abi_encode_params();
    let calldata = [MARKET_MAKER_VAULT_INIT_SELECTOR.as_slice(), &encoded].concat();
    InitializationCall {
        signature: MARKET_MAKER_VAULT_INIT_SIGNATURE.to_string(),
        arguments,
        calldata: calldata.into(),
    }
}

/// `initialize(asset, owner, marketMakerVault, platformFeeAccount, profitSharingAccount, bots)` of
/// the money vault. Needs the market-maker vault proxy, so that proxy must exist first.
pub fn plan_money_vault_init(
    config: &DeploymentConfig,
    market_maker_vault: Address,
) -> Result<InitializationCall, AbiError> {
    let signature = FunctionSignature::parse(MONEY_VAULT_INIT_SIGNATURE)?;
    let arguments = vec![
        DynSolValue::Address(config.asset),
        DynSolValue::Address(config.owner),
        DynSolValue::Address(market_maker_vault),
        DynSolValue::Address(config.platform_fee_account),
        DynSolValue::Address(config.profit_sharing_account),
        DynSolValue::Array(config.bots.iter().copied().map(DynSolValue::Address).collect()),
    ];
    let calldata = signature.encode(&arguments)?;
    Ok(InitializationCall {
        signature: signature.canonical().to_string(),
        arguments,
        calldata,
    })
}

/// A 32-byte access-control role identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Role(pub B256);

impl Role {
    pub const DEFAULT_ADMIN: Role = Role(B256::ZERO);
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How an operator names a role: by accessor, or by raw value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RoleSpec {
    Accessor(String),
    Value(Role),
}

impl FromStr for RoleSpec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == DEFAULT_ADMIN_ROLE {
            return Ok(RoleSpec::Value(Role::DEFAULT_ADMIN));
        }
        if s.starts_with("0x") {
            return s
                .parse::<B256>()
                .map(|value| RoleSpec::Value(Role(value)))
                .map_err(|_| ConfigError::InvalidRole(s.to_string()));
        }
        let identifier = !s.is_empty()
            && !s.starts_with(|c: char| c.is_ascii_digit())
            && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if identifier {
            Ok(RoleSpec::Accessor(s.to_string()))
        } else {
            Err(ConfigError::InvalidRole(s.to_string()))
        }
    }
}

impl fmt::Display for RoleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoleSpec::Accessor(name) => f.write_str(name),
            RoleSpec::Value(role) => role.fmt(f),
        }
    }
}

/// Read a role identifier from its parameterless accessor on `contract`.
pub async fn fetch_role<C>(client: &C, contract: Address, accessor: &str) -> Result<Role, DeployError>
where
    C: ChainClient + ?Sized,
{
    let signature = FunctionSignature::parse(&format!("{accessor}()"))?;
    let output = client.call(contract, signature.encode(&[])?).await?;
    match decode_output(&[DynSolType::FixedBytes(32)], &output)?.as_slice() {
        [DynSolValue::FixedBytes(value, 32)] => Ok(Role(*value)),
        other => Err(AbiError::Decoding(format!("{accessor}() returned {other:?}")).into()),
    }
}

pub async fn resolve_role<C>(client: &C, contract: Address, spec: &RoleSpec) -> Result<Role, DeployError>
where
    C: ChainClient + ?Sized,
{
    match spec {
        RoleSpec::Value(role) => Ok(*role),
        RoleSpec::Accessor(name) => fetch_role(client, contract, name).await,
    }
}

pub async fn has_role<C>(client: &C, contract: Address, role: Role, account: Address) -> Result<bool, DeployError>
where
    C: ChainClient + ?Sized,
{
    Ok(call_view(client, contract, IAccessControl::hasRoleCall { role: role.0, account })
        .await?
        ._0)
}

pub async fn role_admin<C>(client: &C, contract: Address, role: Role) -> Result<Role, DeployError>
where
    C: ChainClient + ?Sized,
{
    Ok(Role(
        call_view(client, contract, IAccessControl::getRoleAdminCall { role: role.0 })
            .await?
            ._0,
    ))
}

/// A role grant the signer is entitled to submit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoleGrant {
    pub contract: Address,
    pub role: Role,
    pub account: Address,
    pub calldata: Bytes,
}

/// Build `grantRole(role, account)` after checking the signer holds the role's admin role.
///
/// Returns `None` if `account` already holds `role`.
pub async fn plan_grant_role<C>(
    client: &C,
    contract: Address,
    role: Role,
    account: Address,
) -> Result<Option<RoleGrant>, DeployError>
where
    C: ChainClient + ?Sized,
{
    if has_role(client, contract, role, account).await? {
        tracing::info!("{account:#x} already holds role {role} on {contract:#x}");
        return Ok(None);
    }
    let signer = client.signer_address();
    let admin_role = role_admin(client, contract, role).await?;
    if !has_role(client, contract, admin_role, signer).await? {
        return Err(DeployError::MissingPrivilege {
            contract,
            account: signer,
            role: role.0,
            admin_role: admin_role.0,
        });
    }
    Ok(Some(RoleGrant {
        contract,
        role,
        account,
        calldata: IAccessControl::grantRoleCall {
            role: role.0,
            account,
        }
        .abi_encode()
        .into(),
    }))
}

/// Grant `role` to `account` and confirm the membership.
///
/// Returns the grant transaction, or `None` if the role was already held.
pub async fn grant_role<C>(
    client: &C,
    contract: Address,
    role: Role,
    account: Address,
    finality: FinalityPolicy,
) -> Result<Option<TxHash>, DeployError>
where
    C: ChainClient + ?Sized,
{
    let Some(grant) = plan_grant_role(client, contract, role, account).await? else {
        return Ok(None);
    };
    tracing::info!("granting role {role} to {account:#x} on {contract:#x}");
    let receipt = match send_and_confirm(client, TxRequest::call(contract, grant.calldata), finality).await {
        Ok(receipt) => receipt,
        // membership changed between the check and the transaction
        Err(err) if err.revert_reason().is_some_and(is_access_control_unauthorized) => {
            let admin_role = role_admin(client, contract, role).await?;
            return Err(DeployError::MissingPrivilege {
                contract,
                account: client.signer_address(),
                role: role.0,
                admin_role: admin_role.0,
            });
        },
        Err(err) => return Err(err.into()),
    };
    if !has_role(client, contract, role, account).await? {
        return Err(DeployError::RoleNotGranted {
            contract,
            role: role.0,
            account,
        });
    }
    Ok(Some(receipt.tx_hash))
}

#[cfg(test)]
mod tests {
    use alloy::primitives::keccak256;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use vault_contract_adapter::sol_types::{VanillaMarketMakerVault, VanillaMoneyVault};

    use super::*;
    use crate::{setup_test, testing::SimulatedChain, Vault};

    fn config() -> DeploymentConfig {
        DeploymentConfig::new(Address::repeat_byte(0xaa), Address::repeat_byte(0xbb))
            .with_fee_accounts(Address::repeat_byte(0x01), Address::repeat_byte(0x02))
            .with_bots([Address::repeat_byte(0xcc), Address::repeat_byte(0xdd)])
    }

    #[test]
    fn test_market_maker_selector_constant() {
        assert_eq!(
            MARKET_MAKER_VAULT_INIT_SELECTOR,
            VanillaMarketMakerVault::initializeCall::SELECTOR
        );
        assert_eq!(
            FunctionSignature::parse(MARKET_MAKER_VAULT_INIT_SIGNATURE)
                .unwrap()
                .selector()
                .0,
            MARKET_MAKER_VAULT_INIT_SELECTOR
        );
    }

    #[test]
    fn test_market_maker_init_calldata() {
        let config = config();
        let init = plan_market_maker_init(&config);
        let expected = VanillaMarketMakerVault::initializeCall {
            assetId: config.asset,
            owner: config.owner,
        }
        .abi_encode();
        assert_eq!(init.calldata().to_vec(), expected);
        assert_eq!(init.calldata().len(), 4 + 2 * 32);
    }

    #[test]
    fn test_money_vault_init_round_trip() {
        let config = config();
        let peer = Address::repeat_byte(0x77);
        let init = plan_money_vault_init(&config, peer).unwrap();
        let decoded = VanillaMoneyVault::initializeCall::abi_decode(init.calldata(), true).unwrap();
        assert_eq!(decoded.assetId, config.asset);
        assert_eq!(decoded.owner, config.owner);
        assert_eq!(decoded.marketMakerVault, peer);
        assert_eq!(decoded.platformFeeAccount, config.platform_fee_account);
        assert_eq!(decoded.profitSharingAccount, config.profit_sharing_account);
        assert_eq!(decoded.bots, config.bot_list());

        let signature = FunctionSignature::parse(&init.signature).unwrap();
        assert_eq!(signature.decode_input(init.calldata()).unwrap(), init.arguments);
    }

    #[rstest]
    #[case("MONEY_VAULT_ROLE", RoleSpec::Accessor("MONEY_VAULT_ROLE".into()))]
    #[case("DEFAULT_ADMIN_ROLE", RoleSpec::Value(Role::DEFAULT_ADMIN))]
    #[case(
        "0x0000000000000000000000000000000000000000000000000000000000000001",
        RoleSpec::Value(Role(B256::with_last_byte(1)))
    )]
    fn test_parse_role_spec(#[case] input: &str, #[case] expected: RoleSpec) {
        assert_eq!(input.parse::<RoleSpec>().unwrap(), expected);
    }

    #[rstest]
    #[case("0x1234")]
    #[case("1ROLE")]
    #[case("MONEY VAULT")]
    #[case("")]
    fn test_reject_role_spec(#[case] input: &str) {
        assert!(matches!(
            input.parse::<RoleSpec>(),
            Err(ConfigError::InvalidRole(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_role_from_accessor() -> anyhow::Result<()> {
        setup_test();
        let chain = SimulatedChain::new();
        let vault = chain.deploy_initialized(Vault::MarketMaker, &config()).await?;
        let role = fetch_role(&chain, vault, MONEY_VAULT_ROLE).await?;
        assert_eq!(role, Role(keccak256(MONEY_VAULT_ROLE)));
        assert!(matches!(
            fetch_role(&chain, vault, "NOT_A_ROLE").await,
            Err(DeployError::Chain(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_grant_role_requires_admin() -> anyhow::Result<()> {
        setup_test();
        let chain = SimulatedChain::new();
        // owner is 0xbb..bb, not the signer
        let vault = chain.deploy_initialized(Vault::MarketMaker, &config()).await?;
        let role = fetch_role(&chain, vault, MONEY_VAULT_ROLE).await?;
        let grantee = Address::repeat_byte(0x99);
        let sent = chain.sent_transactions();

        let err = grant_role(&chain, vault, role, grantee, FinalityPolicy::default())
            .await
            .unwrap_err();
        match err {
            DeployError::MissingPrivilege {
                account,
                role: missing,
                admin_role,
                ..
            } => {
                assert_eq!(account, chain.signer_address());
                assert_eq!(missing, role.0);
                assert_eq!(admin_role, keccak256(ADMIN_ROLE));
            },
            err => panic!("unexpected error {err}"),
        }
        assert!(!has_role(&chain, vault, role, grantee).await?);
        assert_eq!(chain.sent_transactions(), sent);
        Ok(())
    }

    #[tokio::test]
    async fn test_grant_role_is_idempotent() -> anyhow::Result<()> {
        setup_test();
        let chain = SimulatedChain::new();
        let config = DeploymentConfig::new(Address::repeat_byte(0xaa), chain.signer_address());
        let vault = chain.deploy_initialized(Vault::MarketMaker, &config).await?;
        let role = fetch_role(&chain, vault, MONEY_VAULT_ROLE).await?;
        let grantee = Address::repeat_byte(0x99);

        let first = grant_role(&chain, vault, role, grantee, FinalityPolicy::default()).await?;
        assert!(first.is_some());
        assert!(has_role(&chain, vault, role, grantee).await?);
        let second = grant_role(&chain, vault, role, grantee, FinalityPolicy::default()).await?;
        assert_eq!(second, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_revert_during_grant_is_missing_privilege() -> anyhow::Result<()> {
        setup_test();
        let chain = SimulatedChain::new();
        let config = DeploymentConfig::new(Address::repeat_byte(0xaa), chain.signer_address());
        let vault = chain.deploy_initialized(Vault::MarketMaker, &config).await?;
        let role = fetch_role(&chain, vault, MONEY_VAULT_ROLE).await?;
        // the check passes, then the signer loses its admin role before the grant lands
        let grant = plan_grant_role(&chain, vault, role, Address::repeat_byte(0x99))
            .await?
            .unwrap();
        chain.revoke_role(vault, keccak256(ADMIN_ROLE), chain.signer_address());
        let err = send_and_confirm(
            &chain,
            TxRequest::call(vault, grant.calldata),
            FinalityPolicy::default(),
        )
        .await
        .unwrap_err();
        assert!(is_access_control_unauthorized(err.revert_reason().unwrap()));
        assert!(!has_role(&chain, vault, role, Address::repeat_byte(0x99)).await?);
        Ok(())
    }
}
