use ethers::contract::abigen;

// Read-only views used by `status` and to skip already-satisfied steps of a subscription batch.
abigen!(
    Safe,
    r#"[
        function isModuleEnabled(address module) view returns (bool)
    ]"#
);

abigen!(
    Hub,
    r#"[
        function isApprovedForAll(address account, address operator) view returns (bool)
    ]"#
);

// `getSubscription` returns a static struct; its ABI encoding is the same as the flattened
// return list below.
abigen!(
    SubscriptionModule,
    r#"[
        function getSubscriptionIds(address subscriber) view returns (bytes32[])
        function isValidOrRedeemable(bytes32 id) view returns (uint256)
        function getSubscription(bytes32 id) view returns (address subscriber, address recipient, uint256 amount, uint256 lastRedeemed, uint256 frequency, uint8 category)
    ]"#
);
