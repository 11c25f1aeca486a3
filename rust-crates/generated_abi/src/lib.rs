use ethers::{
    providers::Middleware,
    types::{
        Address,
        H256,
    },
};
use std::sync::Arc;

pub mod guess_game_types {
    use ethers::contract::abigen;

    abigen!(
        GuessTheNumberGame,
        r#"[
            function owner() external view returns (address)
            function submissionPeriod() external view returns (uint256)
            function revealPeriod() external view returns (uint256)
            function minNumPlayers() external view returns (uint256)
            function participationFee() external view returns (uint256)
            function winningAddresses(uint256 index) external view returns (address)
            function startGame() external
            function enterGuess(bytes32 hashedGuess) external payable
            function revealSaltAndGuess(uint256 guess, uint256 salt) external
            function calculateWinningGuess() external
            function selectWinner() external
            event GameStarted(uint256 timestamp)
            event AllGuessesSubmitted()
            event GuessSubmitted(address player)
            event WinningGuessCalculated(uint256 winningGuess)
        ]"#
    );
}

pub use guess_game_types::{
    AllGuessesSubmittedFilter,
    GameStartedFilter,
    GuessSubmittedFilter,
    GuessTheNumberGame,
    GuessTheNumberGameEvents,
    WinningGuessCalculatedFilter,
};

pub fn game_contract<M: Middleware>(
    address: Address,
    client: Arc<M>,
) -> GuessTheNumberGame<M> {
    GuessTheNumberGame::new(address, client)
}

/// Topic0 of every event the game contract emits, in declaration order.
pub fn game_event_signatures() -> [H256; 4] {
    use ethers::contract::EthEvent;

    [
        GameStartedFilter::signature(),
        AllGuessesSubmittedFilter::signature(),
        GuessSubmittedFilter::signature(),
        WinningGuessCalculatedFilter::signature(),
    ]
}
