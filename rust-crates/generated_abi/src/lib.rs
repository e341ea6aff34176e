use alloy::{
    primitives::U256,
    sol,
};

pub mod dice_game_types {
    use super::*;

    sol! {
        #[allow(missing_docs)]
        #[derive(Debug, PartialEq, Eq)]
        #[sol(rpc)]
        contract DiceGame {
            event PlayerWon(
                address indexed player,
                uint256 betAmount,
                uint256 winningAmount,
                uint256 rolledNumber
            );
            event PlayerLost(address indexed player, uint256 betAmount, uint256 rolledNumber);

            function rollDice(uint8 prediction) external payable;
            function getMinBet() external view returns (uint256);
            function getMultiplier() external view returns (uint256);
            function getMostRecentRoll() external view returns (uint256);
            function getPlayerScore(address player) external view returns (uint256);
            function getPlayers() external view returns (address[] memory);
        }
    }
}

pub mod liquidity_pool_types {
    use super::*;

    sol! {
        #[allow(missing_docs)]
        #[derive(Debug, PartialEq, Eq)]
        #[sol(rpc)]
        contract LiquidityPool {
            function addLiquidity() external payable;
            function removeLiquidity(uint256 amount) external;
            function getTotalLiquidity() external view returns (uint256);
            function getLiquidityProviderBalance(address provider) external view returns (uint256);
            function getLiquidityProviderShares(address provider) external view returns (uint256);
        }
    }
}

/// Highest face of the die; predictions and rolled numbers live in `1..=DIE_FACES`.
pub const DIE_FACES: u8 = 6;

pub fn is_valid_face(n: u8) -> bool {
    (1..=DIE_FACES).contains(&n)
}

/// Narrows an on-chain rolled number to a die face, rejecting anything outside `1..=6`.
pub fn rolled_face(raw: U256) -> Option<u8> {
    let face: u8 = raw.try_into().ok()?;
    is_valid_face(face).then_some(face)
}
