//! ABI bindings for the contracts the session talks to.

use alloy_sol_types::sol;

sol! {
    /// Arcade game contract: prize pool, scoreboard and play entry points.
    interface IGame {
        /// Prize amounts the caller is eligible for, authorized by a signature
        /// over `(caller, chainId)`.
        function getWinnings(uint256 count, bytes signature) external view returns (uint256[] winnings);

        /// Current scoreboard as parallel arrays.
        function scores() external view returns (uint256[] scores, address[] players);

        /// Submits the re-ranked scoreboard and pays out `winnings`.
        function submitScore(uint256[] scores, address[] players, bytes signature, uint256[] winnings) external;

        function freePlays(address player) external view returns (bool claimed);

        function freePlay() external;

        function play() external;

        function getPrizePool() external view returns (uint256[] pool);
    }

    interface IERC20 {
        function name() external view returns (string name);

        function symbol() external view returns (string symbol);

        function decimals() external view returns (uint8 decimals);

        function allowance(address owner, address spender) external view returns (uint256 remaining);

        function approve(address spender, uint256 amount) external returns (bool approved);
    }
}
