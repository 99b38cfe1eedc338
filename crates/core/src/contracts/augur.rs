use alloy::sol;

sol! {
    #[derive(Debug)]
    event MarketCreated(
        address indexed universe,
        uint256 endTime,
        string extraInfo,
        address market,
        address indexed marketCreator,
        address designatedReporter,
        uint256 feePerCashInAttoCash,
        uint256[] prices,
        uint8 marketType,
        uint256 numTicks,
        bytes32[] outcomes,
        uint256 noShowBond,
        uint256 timestamp
    );

    #[derive(Debug)]
    event InitialReportSubmitted(
        address indexed universe,
        address indexed reporter,
        address indexed market,
        address initialReporter,
        uint256 amountStaked,
        bool isDesignatedReporter,
        uint256[] payoutNumerators,
        string description,
        uint256 nextWindowStartTime,
        uint256 nextWindowEndTime,
        uint256 timestamp
    );

    #[derive(Debug)]
    event TokensMinted(
        address indexed universe,
        address indexed token,
        address indexed target,
        uint256 amount,
        uint8 tokenType,
        address market,
        uint256 totalSupply
    );

    #[derive(Debug)]
    event TokensBurned(
        address indexed universe,
        address indexed token,
        address indexed target,
        uint256 amount,
        uint8 tokenType,
        address market,
        uint256 totalSupply
    );
}

sol! {
    #[derive(Debug)]
    event OrderCreated(
        address indexed universe,
        address indexed market,
        bytes32 indexed orderId,
        address creator,
        uint8 outcome,
        uint8 orderType,
        uint256 price,
        uint256 amount,
        bytes32 tradeGroupId,
        uint256 timestamp
    );

    #[derive(Debug)]
    event OrderFilled(
        address indexed universe,
        address indexed market,
        bytes32 indexed orderId,
        address creator,
        address filler,
        uint8 outcome,
        uint8 orderType,
        uint256 price,
        uint256 amountFilled,
        bytes32 tradeGroupId,
        uint256 timestamp
    );

    #[derive(Debug)]
    event OrderCanceled(
        address indexed universe,
        address indexed market,
        bytes32 indexed orderId,
        address creator,
        uint8 outcome,
        uint8 orderType,
        uint256 timestamp
    );

    #[derive(Debug)]
    event ProfitLossChanged(
        address indexed universe,
        address indexed market,
        address indexed account,
        uint8 outcome,
        int256 netPosition,
        uint256 avgPrice,
        int256 realizedProfit,
        int256 frozenFunds,
        int256 realizedCost,
        uint256 timestamp
    );

    #[derive(Debug)]
    event MarketVolumeChanged(
        address indexed universe,
        address indexed market,
        uint256 volume,
        uint256[] outcomeVolumes,
        uint256 timestamp
    );
}

sol! {
    #[derive(Debug)]
    event TransferSingle(
        address indexed operator,
        address indexed from,
        address indexed to,
        uint256 id,
        uint256 value
    );
}
