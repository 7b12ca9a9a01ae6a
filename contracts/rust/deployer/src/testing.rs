//! Deterministic in-process chain for tests.
//!
//! [`SimulatedChain`] implements [`ChainClient`] by executing transactions against an in-memory
//! world state. It recognizes the creation code handed out by [`SimulatedChain::artifacts`] and
//! emulates the external surface of `EIP173Proxy` and both vaults on top of plain storage slots,
//! so proxy storage survives upgrades the way it does on a real chain.
//!
//! Failure injection: [`SimulatedChain::reject_nth_send`] mines a failed transaction,
//! [`SimulatedChain::stall_receipts`] keeps transactions pending forever.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
};

use alloy::{
    primitives::{address, keccak256, Address, Bytes, TxHash, B256, U256},
    sol_types::{Revert, SolError, SolInterface, SolValue},
};
use async_trait::async_trait;
use parking_lot::Mutex;
use vault_contract_adapter::{
    evm::{decode_revert, PROXY_NOT_AUTHORIZED},
    sol_types::{
        EIP173Proxy::EIP173ProxyCalls,
        IAccessControl::{AccessControlBadConfirmation, AccessControlUnauthorizedAccount, IAccessControlCalls},
        IInitializable::InvalidInitialization,
        VanillaMarketMakerVault::VanillaMarketMakerVaultCalls,
        VanillaMoneyVault::VanillaMoneyVaultCalls,
    },
};

use crate::{
    artifacts::{ContractArtifact, VaultArtifacts},
    chain::{send_and_confirm, ChainClient, FinalityPolicy, Receipt, TxRequest},
    config::DeploymentConfig,
    error::{ChainError, DeployError},
    planner::{plan_market_maker_init, plan_money_vault_init},
    proxy::{deploy_proxy, implementation_of, ADMIN_SLOT, IMPLEMENTATION_SLOT},
    Contracts, Vault,
};

/// Mnemonic of the well-known local development accounts.
pub const DEV_MNEMONIC: &str = "test test test test test test test test test test test junk";
/// Account 0 of [`DEV_MNEMONIC`].
pub const DEV_ACCOUNT: Address = address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266");

pub const SIMULATED_CHAIN_ID: u64 = 31337;

/// Implementation generations the simulated chain can deploy. Both share one storage layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VaultVersion {
    V2,
    V3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Code {
    Proxy,
    Vault(Vault, VaultVersion),
}

const ALL_CODE: [Code; 5] = [
    Code::Proxy,
    Code::Vault(Vault::MarketMaker, VaultVersion::V2),
    Code::Vault(Vault::MarketMaker, VaultVersion::V3),
    Code::Vault(Vault::Money, VaultVersion::V2),
    Code::Vault(Vault::Money, VaultVersion::V3),
];

impl Code {
    fn bytecode(self) -> Bytes {
        let tag = match self {
            Code::Proxy => "EIP173Proxy".to_string(),
            Code::Vault(vault, version) => format!("{vault}{version:?}"),
        };
        Bytes::from(format!("simulated:{tag};").into_bytes())
    }

    /// Split creation input into the code it deploys and its constructor arguments.
    fn recognize(input: &[u8]) -> Option<(Code, &[u8])> {
        ALL_CODE.into_iter().find_map(|code| {
            let bytecode = code.bytecode();
            input
                .strip_prefix(bytecode.as_ref())
                .map(|args| (code, args))
        })
    }
}

// vault storage layout
const INITIALIZED_SLOT: u8 = 0;
const ASSET_SLOT: u8 = 1;
const OWNER_SLOT: u8 = 2;
const MARKET_MAKER_VAULT_SLOT: u8 = 3;
const PLATFORM_FEE_SLOT: u8 = 4;
const PROFIT_SHARING_SLOT: u8 = 5;
const ROLES_SLOT: u8 = 10;
const ROLE_ADMINS_SLOT: u8 = 11;
const BALANCES_SLOT: u8 = 12;
const WHITELIST_SLOT: u8 = 13;

fn slot(n: u8) -> B256 {
    B256::with_last_byte(n)
}

/// Solidity `mapping` slot of `key` in the mapping rooted at `base`.
fn mapping_slot(key: B256, base: B256) -> B256 {
    keccak256([key.as_slice(), base.as_slice()].concat())
}

fn role_member_slot(role: B256, account: Address) -> B256 {
    mapping_slot(account.into_word(), mapping_slot(role, slot(ROLES_SLOT)))
}

fn flag(value: bool) -> B256 {
    B256::with_last_byte(value as u8)
}

fn revert_string(reason: &str) -> Bytes {
    Revert {
        reason: reason.to_string(),
    }
    .abi_encode()
    .into()
}

#[derive(Clone, Debug, Default)]
struct Account {
    code: Option<Code>,
    storage: BTreeMap<B256, B256>,
}

#[derive(Clone, Debug, Default)]
struct World {
    accounts: HashMap<Address, Account>,
}

impl World {
    fn code(&self, address: Address) -> Option<Code> {
        self.accounts.get(&address).and_then(|account| account.code)
    }

    fn sload(&self, address: Address, key: B256) -> B256 {
        self.accounts
            .get(&address)
            .and_then(|account| account.storage.get(&key))
            .copied()
            .unwrap_or_default()
    }

    fn sstore(&mut self, address: Address, key: B256, value: B256) {
        let storage = &mut self.accounts.entry(address).or_default().storage;
        if value == B256::ZERO {
            storage.remove(&key);
        } else {
            storage.insert(key, value);
        }
    }

    fn create(&mut self, sender: Address, address: Address, input: &[u8]) -> Result<(), Bytes> {
        let Some((code, args)) = Code::recognize(input) else {
            return Err(revert_string("simulated chain: unknown creation code"));
        };
        self.accounts.entry(address).or_default().code = Some(code);
        match code {
            Code::Vault(..) => {
                // implementations disable their initializers in the constructor
                self.sstore(address, slot(INITIALIZED_SLOT), B256::repeat_byte(0xff));
                Ok(())
            },
            Code::Proxy => {
                let (implementation, owner, data) =
                    <(Address, Address, Bytes)>::abi_decode_params(args, true)
                        .map_err(|_| Bytes::new())?;
                self.sstore(address, IMPLEMENTATION_SLOT, implementation.into_word());
                self.sstore(address, ADMIN_SLOT, owner.into_word());
                if !data.is_empty() {
                    self.delegate(address, implementation, sender, &data)?;
                }
                Ok(())
            },
        }
    }

    fn call(&mut self, sender: Address, to: Address, input: &[u8]) -> Result<Bytes, Bytes> {
        match self.code(to) {
            None => Ok(Bytes::new()),
            Some(Code::Proxy) => self.proxy_call(sender, to, input),
            Some(Code::Vault(vault, _)) => Frame {
                world: self,
                this: to,
                sender,
            }
            .execute(vault, input),
        }
    }

    /// Run the code of `implementation` against the storage of `this`.
    fn delegate(
        &mut self,
        this: Address,
        implementation: Address,
        sender: Address,
        input: &[u8],
    ) -> Result<Bytes, Bytes> {
        match self.code(implementation) {
            Some(Code::Vault(vault, _)) => Frame {
                world: self,
                this,
                sender,
            }
            .execute(vault, input),
            _ => Err(Bytes::new()),
        }
    }

    fn proxy_call(&mut self, sender: Address, proxy: Address, input: &[u8]) -> Result<Bytes, Bytes> {
        let owner = Address::from_word(self.sload(proxy, ADMIN_SLOT));
        let only_owner = || {
            if sender == owner {
                Ok(())
            } else {
                Err(revert_string(PROXY_NOT_AUTHORIZED))
            }
        };
        let Ok(call) = EIP173ProxyCalls::abi_decode(input, true) else {
            let implementation = Address::from_word(self.sload(proxy, IMPLEMENTATION_SLOT));
            return self.delegate(proxy, implementation, sender, input);
        };
        match call {
            EIP173ProxyCalls::owner(_) => Ok(owner.abi_encode().into()),
            EIP173ProxyCalls::transferOwnership(call) => {
                only_owner()?;
                self.sstore(proxy, ADMIN_SLOT, call.newOwner.into_word());
                Ok(Bytes::new())
            },
            EIP173ProxyCalls::upgradeTo(call) => {
                only_owner()?;
                self.sstore(proxy, IMPLEMENTATION_SLOT, call.newImplementation.into_word());
                Ok(Bytes::new())
            },
            EIP173ProxyCalls::upgradeToAndCall(call) => {
                only_owner()?;
                self.sstore(proxy, IMPLEMENTATION_SLOT, call.newImplementation.into_word());
                self.delegate(proxy, call.newImplementation, sender, &call.data)
            },
            EIP173ProxyCalls::supportsInterface(call) => {
                // ERC-165 and ERC-173
                let supported = [[0x01, 0xff, 0xc9, 0xa7], [0x7f, 0x58, 0x28, 0xd0]];
                Ok(supported.contains(&call.id.0).abi_encode().into())
            },
        }
    }
}

/// Execution context of a vault function: code of the vault, storage and identity of `this`.
struct Frame<'w> {
    world: &'w mut World,
    this: Address,
    sender: Address,
}

impl Frame<'_> {
    fn load(&self, key: B256) -> B256 {
        self.world.sload(self.this, key)
    }

    fn store(&mut self, key: B256, value: B256) {
        self.world.sstore(self.this, key, value)
    }

    fn address_at(&self, n: u8) -> Bytes {
        Address::from_word(self.load(slot(n))).abi_encode().into()
    }

    fn has_role(&self, role: B256, account: Address) -> bool {
        self.load(role_member_slot(role, account)) != B256::ZERO
    }

    fn role_admin(&self, role: B256) -> B256 {
        self.load(mapping_slot(role, slot(ROLE_ADMINS_SLOT)))
    }

    fn set_role(&mut self, role: B256, account: Address, member: bool) {
        self.store(role_member_slot(role, account), flag(member));
    }

    fn set_role_admin(&mut self, role: B256, admin: B256) {
        self.store(mapping_slot(role, slot(ROLE_ADMINS_SLOT)), admin);
    }

    fn check_role(&self, role: B256) -> Result<(), Bytes> {
        if self.has_role(role, self.sender) {
            return Ok(());
        }
        Err(AccessControlUnauthorizedAccount {
            account: self.sender,
            neededRole: role,
        }
        .abi_encode()
        .into())
    }

    fn initializer(&mut self) -> Result<(), Bytes> {
        if self.load(slot(INITIALIZED_SLOT)) != B256::ZERO {
            return Err(InvalidInitialization {}.abi_encode().into());
        }
        self.store(slot(INITIALIZED_SLOT), flag(true));
        Ok(())
    }

    fn init_admin(&mut self, owner: Address) {
        self.store(slot(OWNER_SLOT), owner.into_word());
        self.set_role(B256::ZERO, owner, true);
        self.set_role(keccak256("ADMIN_ROLE"), owner, true);
    }

    fn execute(mut self, vault: Vault, input: &[u8]) -> Result<Bytes, Bytes> {
        if let Ok(call) = IAccessControlCalls::abi_decode(input, true) {
            return self.access_control(call);
        }
        match vault {
            Vault::MarketMaker => match VanillaMarketMakerVaultCalls::abi_decode(input, true) {
                Ok(call) => self.market_maker(call),
                Err(_) => Err(Bytes::new()),
            },
            Vault::Money => match VanillaMoneyVaultCalls::abi_decode(input, true) {
                Ok(call) => self.money_vault(call),
                Err(_) => Err(Bytes::new()),
            },
        }
    }

    fn access_control(&mut self, call: IAccessControlCalls) -> Result<Bytes, Bytes> {
        match call {
            IAccessControlCalls::DEFAULT_ADMIN_ROLE(_) => Ok(B256::ZERO.abi_encode().into()),
            IAccessControlCalls::hasRole(call) => {
                Ok(self.has_role(call.role, call.account).abi_encode().into())
            },
            IAccessControlCalls::getRoleAdmin(call) => {
                Ok(self.role_admin(call.role).abi_encode().into())
            },
            IAccessControlCalls::grantRole(call) => {
                self.check_role(self.role_admin(call.role))?;
                self.set_role(call.role, call.account, true);
                Ok(Bytes::new())
            },
            IAccessControlCalls::revokeRole(call) => {
                self.check_role(self.role_admin(call.role))?;
                self.set_role(call.role, call.account, false);
                Ok(Bytes::new())
            },
            IAccessControlCalls::renounceRole(call) => {
                if call.callerConfirmation != self.sender {
                    return Err(AccessControlBadConfirmation {}.abi_encode().into());
                }
                self.set_role(call.role, call.callerConfirmation, false);
                Ok(Bytes::new())
            },
        }
    }

    fn market_maker(&mut self, call: VanillaMarketMakerVaultCalls) -> Result<Bytes, Bytes> {
        use VanillaMarketMakerVaultCalls as Call;
        match call {
            Call::initialize(call) => {
                self.initializer()?;
                self.store(slot(ASSET_SLOT), call.assetId.into_word());
                self.init_admin(call.owner);
                self.set_role_admin(keccak256("MONEY_VAULT_ROLE"), keccak256("ADMIN_ROLE"));
                Ok(Bytes::new())
            },
            Call::ADMIN_ROLE(_) => Ok(keccak256("ADMIN_ROLE").abi_encode().into()),
            Call::MONEY_VAULT_ROLE(_) => Ok(keccak256("MONEY_VAULT_ROLE").abi_encode().into()),
            Call::assetId(_) => Ok(self.address_at(ASSET_SLOT)),
            Call::owner(_) => Ok(self.address_at(OWNER_SLOT)),
            Call::balances(call) => {
                let key = mapping_slot(call.account.into_word(), slot(BALANCES_SLOT));
                Ok(U256::from_be_bytes(self.load(key).0).abi_encode().into())
            },
            Call::whitelistStake(call) => {
                self.check_role(keccak256("ADMIN_ROLE"))?;
                let key = mapping_slot(call.account.into_word(), slot(WHITELIST_SLOT));
                self.store(key, flag(true));
                Ok(Bytes::new())
            },
            Call::settlement(call) => {
                self.check_role(keccak256("MONEY_VAULT_ROLE"))?;
                let key = mapping_slot(call.account.into_word(), slot(BALANCES_SLOT));
                let balance = U256::from_be_bytes(self.load(key).0) + call.amount;
                self.store(key, B256::from(balance.to_be_bytes::<32>()));
                Ok(Bytes::new())
            },
        }
    }

    fn money_vault(&mut self, call: VanillaMoneyVaultCalls) -> Result<Bytes, Bytes> {
        use VanillaMoneyVaultCalls as Call;
        match call {
            Call::initialize(call) => {
                self.initializer()?;
                self.store(slot(ASSET_SLOT), call.assetId.into_word());
                self.store(slot(MARKET_MAKER_VAULT_SLOT), call.marketMakerVault.into_word());
                self.store(slot(PLATFORM_FEE_SLOT), call.platformFeeAccount.into_word());
                self.store(slot(PROFIT_SHARING_SLOT), call.profitSharingAccount.into_word());
                self.init_admin(call.owner);
                self.set_role_admin(keccak256("BOT_ROLE"), keccak256("ADMIN_ROLE"));
                for bot in call.bots {
                    self.set_role(keccak256("BOT_ROLE"), bot, true);
                }
                Ok(Bytes::new())
            },
            Call::ADMIN_ROLE(_) => Ok(keccak256("ADMIN_ROLE").abi_encode().into()),
            Call::BOT_ROLE(_) => Ok(keccak256("BOT_ROLE").abi_encode().into()),
            Call::assetId(_) => Ok(self.address_at(ASSET_SLOT)),
            Call::owner(_) => Ok(self.address_at(OWNER_SLOT)),
            Call::marketMakerVault(_) => Ok(self.address_at(MARKET_MAKER_VAULT_SLOT)),
            Call::platformFeeAccount(_) => Ok(self.address_at(PLATFORM_FEE_SLOT)),
            Call::profitSharingAccount(_) => Ok(self.address_at(PROFIT_SHARING_SLOT)),
            Call::balances(call) => {
                let key = mapping_slot(call.account.into_word(), slot(BALANCES_SLOT));
                Ok(U256::from_be_bytes(self.load(key).0).abi_encode().into())
            },
        }
    }
}

#[derive(Debug, Default)]
struct State {
    world: World,
    nonces: HashMap<Address, u64>,
    receipts: HashMap<TxHash, Receipt>,
    pending: HashSet<TxHash>,
    block_number: u64,
    send_attempts: usize,
    sent: usize,
    reject: HashSet<usize>,
    stall: bool,
}

impl State {
    fn mine(&mut self, tx_hash: TxHash, status: bool, contract_address: Option<Address>, gas_used: u64) {
        self.block_number += 1;
        self.receipts.insert(tx_hash, Receipt {
            tx_hash,
            status,
            contract_address,
            gas_used,
            block_number: Some(self.block_number),
        });
    }
}

/// An in-memory chain. Clones share state; [`SimulatedChain::with_signer`] changes only the
/// sending account.
#[derive(Clone, Debug)]
pub struct SimulatedChain {
    signer: Address,
    state: Arc<Mutex<State>>,
}

impl Default for SimulatedChain {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedChain {
    pub fn new() -> Self {
        Self {
            signer: DEV_ACCOUNT,
            state: Default::default(),
        }
    }

    /// A client on the same chain signing as `signer`.
    pub fn with_signer(&self, signer: Address) -> Self {
        Self {
            signer,
            state: self.state.clone(),
        }
    }

    /// Creation code for the V2 vaults and the proxy.
    pub fn artifacts(&self) -> VaultArtifacts {
        self.artifacts_for(VaultVersion::V2)
    }

    pub fn artifacts_for(&self, version: VaultVersion) -> VaultArtifacts {
        let implementation = |vault: Vault| {
            ContractArtifact::new(
                format!("{vault}{version:?}"),
                Code::Vault(vault, version).bytecode(),
            )
        };
        VaultArtifacts {
            market_maker_vault: implementation(Vault::MarketMaker),
            money_vault: implementation(Vault::Money),
            proxy: ContractArtifact::new("EIP173Proxy", Code::Proxy.bytecode()),
        }
    }

    /// Number of transactions broadcast, including failed ones.
    pub fn sent_transactions(&self) -> usize {
        self.state.lock().sent
    }

    /// Make the `n`-th send attempt (counted from 0 over the chain's lifetime) mine as a failed
    /// transaction.
    pub fn reject_nth_send(&self, n: usize) {
        self.state.lock().reject.insert(n);
    }

    /// While set, transactions are accepted but never mined.
    pub fn stall_receipts(&self, stall: bool) {
        self.state.lock().stall = stall;
    }

    pub fn code(&self, address: Address) -> Bytes {
        self.state
            .lock()
            .world
            .code(address)
            .map(Code::bytecode)
            .unwrap_or_default()
    }

    pub fn storage(&self, address: Address) -> BTreeMap<B256, B256> {
        self.state
            .lock()
            .world
            .accounts
            .get(&address)
            .map(|account| account.storage.clone())
            .unwrap_or_default()
    }

    pub fn balance(&self, vault: Address, account: Address) -> U256 {
        let key = mapping_slot(account.into_word(), slot(BALANCES_SLOT));
        U256::from_be_bytes(self.state.lock().world.sload(vault, key).0)
    }

    /// Write a staked balance directly into the vault's storage.
    pub fn seed_balance(&self, vault: Address, account: Address, amount: U256) {
        let key = mapping_slot(account.into_word(), slot(BALANCES_SLOT));
        self.state
            .lock()
            .world
            .sstore(vault, key, B256::from(amount.to_be_bytes::<32>()));
    }

    pub fn is_whitelisted(&self, vault: Address, account: Address) -> bool {
        let key = mapping_slot(account.into_word(), slot(WHITELIST_SLOT));
        self.state.lock().world.sload(vault, key) != B256::ZERO
    }

    /// Drop a role membership without a transaction.
    pub fn revoke_role(&self, vault: Address, role: B256, account: Address) {
        self.state
            .lock()
            .world
            .sstore(vault, role_member_slot(role, account), B256::ZERO);
    }

    /// Which implementation generation `proxy` delegates to.
    pub async fn version_of(&self, proxy: Address) -> Result<VaultVersion, ChainError> {
        let implementation = implementation_of(self, proxy).await?;
        match self.state.lock().world.code(implementation) {
            Some(Code::Vault(_, version)) => Ok(version),
            _ => Err(ChainError::Rpc(format!(
                "{implementation:#x} is not a vault implementation"
            ))),
        }
    }

    /// Deploy a bare implementation of `vault`.
    pub async fn deploy_vault_version(
        &self,
        vault: Vault,
        version: VaultVersion,
    ) -> Result<Address, DeployError> {
        let code = Code::Vault(vault, version).bytecode();
        let receipt =
            send_and_confirm(self, TxRequest::create(code), FinalityPolicy::default()).await?;
        Ok(receipt.contract_address.unwrap_or_default())
    }

    /// Deploy a V2 implementation of `vault` behind an initialized proxy and return the proxy.
    ///
    /// A money vault is pointed at a placeholder market-maker vault.
    pub async fn deploy_initialized(
        &self,
        vault: Vault,
        config: &DeploymentConfig,
    ) -> Result<Address, DeployError> {
        let implementation = self.deploy_vault_version(vault, VaultVersion::V2).await?;
        let init = match vault {
            Vault::MarketMaker => plan_market_maker_init(config),
            Vault::Money => plan_money_vault_init(config, Address::repeat_byte(0x4d))?,
        };
        let binding = deploy_proxy(
            self,
            &mut Contracts::new(),
            &self.artifacts().proxy,
            vault,
            implementation,
            config.owner,
            init,
            FinalityPolicy::default(),
        )
        .await?;
        Ok(binding.proxy_address)
    }

    fn reverted(data: Bytes) -> ChainError {
        ChainError::Reverted {
            tx_hash: None,
            reason: Some(decode_revert(&data)),
            data: Some(data),
        }
    }
}

#[async_trait]
impl ChainClient for SimulatedChain {
    fn signer_address(&self) -> Address {
        self.signer
    }

    async fn chain_id(&self) -> Result<u64, ChainError> {
        Ok(SIMULATED_CHAIN_ID)
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ChainError> {
        let mut world = self.state.lock().world.clone();
        world.call(self.signer, to, &data).map_err(Self::reverted)
    }

    async fn send(&self, tx: TxRequest) -> Result<TxHash, ChainError> {
        let mut state = self.state.lock();
        let attempt = state.send_attempts;
        state.send_attempts += 1;
        let nonce = state.nonces.get(&self.signer).copied().unwrap_or_default();
        let tx_hash = keccak256(
            [self.signer.as_slice(), &nonce.to_be_bytes(), tx.input.as_ref()].concat(),
        );
        let gas_used = 21_000 + 16 * tx.input.len() as u64;

        let reject = state.reject.remove(&attempt);
        let mut contract_address = None;
        if !reject && !state.stall {
            // dry run first, a revert is reported without broadcasting
            let mut world = state.world.clone();
            match tx.to {
                Some(to) => {
                    world.call(self.signer, to, &tx.input).map_err(Self::reverted)?;
                },
                None => {
                    let address = self.signer.create(nonce);
                    world
                        .create(self.signer, address, &tx.input)
                        .map_err(Self::reverted)?;
                    contract_address = Some(address);
                },
            }
            state.world = world;
        }

        state.nonces.insert(self.signer, nonce + 1);
        state.sent += 1;
        if state.stall {
            state.pending.insert(tx_hash);
        } else {
            state.mine(tx_hash, !reject, contract_address, gas_used);
        }
        Ok(tx_hash)
    }

    async fn wait(&self, tx_hash: TxHash, finality: FinalityPolicy) -> Result<Receipt, ChainError> {
        let pending = {
            let state = self.state.lock();
            if let Some(receipt) = state.receipts.get(&tx_hash) {
                return Ok(receipt.clone());
            }
            state.pending.contains(&tx_hash)
        };
        if !pending {
            return Err(ChainError::Rpc(format!("unknown transaction {tx_hash}")));
        }
        tokio::time::sleep(finality.timeout).await;
        Err(ChainError::Unconfirmed(tx_hash))
    }

    async fn code_at(&self, address: Address) -> Result<Bytes, ChainError> {
        Ok(self.code(address))
    }

    async fn storage_at(&self, address: Address, slot: B256) -> Result<B256, ChainError> {
        Ok(self.state.lock().world.sload(address, slot))
    }
}
