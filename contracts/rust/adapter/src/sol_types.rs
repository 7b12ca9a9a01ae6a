//! `sol!` declarations of the deployed contracts' ABIs.
//!
//! The call structs generated here (`initializeCall`, `grantRoleCall`, ...) carry the function
//! selectors and know how to encode their arguments and decode their return data.

use alloy::sol;

sol! {
    /// OpenZeppelin `AccessControl`, shared by both vaults.
    #[derive(Debug, PartialEq, Eq)]
    interface IAccessControl {
        error AccessControlUnauthorizedAccount(address account, bytes32 neededRole);
        error AccessControlBadConfirmation();

        event RoleGranted(bytes32 indexed role, address indexed account, address indexed sender);
        event RoleRevoked(bytes32 indexed role, address indexed account, address indexed sender);

        function DEFAULT_ADMIN_ROLE() external view returns (bytes32);
        function hasRole(bytes32 role, address account) external view returns (bool);
        function getRoleAdmin(bytes32 role) external view returns (bytes32);
        function grantRole(bytes32 role, address account) external;
        function revokeRole(bytes32 role, address account) external;
        function renounceRole(bytes32 role, address callerConfirmation) external;
    }

    /// Errors raised by OpenZeppelin's `Initializable`.
    #[derive(Debug, PartialEq, Eq)]
    interface IInitializable {
        error InvalidInitialization();
        error NotInitializing();
    }

    /// `VanillaMarketMakerVault` (V2 implementation), reached through its proxy.
    #[derive(Debug, PartialEq, Eq)]
    contract VanillaMarketMakerVault {
        function initialize(address assetId, address owner) external;

        function ADMIN_ROLE() external view returns (bytes32);
        function MONEY_VAULT_ROLE() external view returns (bytes32);

        function assetId() external view returns (address);
        function owner() external view returns (address);
        function balances(address account) external view returns (uint256);

        function whitelistStake(address account) external;
        function settlement(address account, uint256 amount) external;
    }

    /// `VanillaMoneyVault` (V2 implementation), reached through its proxy.
    #[derive(Debug, PartialEq, Eq)]
    contract VanillaMoneyVault {
        function initialize(
            address assetId,
            address owner,
            address marketMakerVault,
            address platformFeeAccount,
            address profitSharingAccount,
            address[] bots
        ) external;

        function ADMIN_ROLE() external view returns (bytes32);
        function BOT_ROLE() external view returns (bytes32);

        function assetId() external view returns (address);
        function owner() external view returns (address);
        function marketMakerVault() external view returns (address);
        function platformFeeAccount() external view returns (address);
        function profitSharingAccount() external view returns (address);
        function balances(address account) external view returns (uint256);
    }

    /// The ownable EIP-173 proxy fronting each vault.
    ///
    /// The constructor delegate-calls `data` against the implementation, so a freshly deployed
    /// proxy is initialized in its creation transaction.
    #[derive(Debug, PartialEq, Eq)]
    contract EIP173Proxy {
        event ProxyImplementationUpdated(address indexed previousImplementation, address indexed newImplementation);
        event OwnershipTransferred(address indexed previousOwner, address indexed newOwner);

        constructor(address implementationAddress, address ownerAddress, bytes data) payable;

        function owner() external view returns (address);
        function transferOwnership(address newOwner) external;
        function upgradeTo(address newImplementation) external;
        function upgradeToAndCall(address newImplementation, bytes data) external payable;
        function supportsInterface(bytes4 id) external view returns (bool);
    }
}
