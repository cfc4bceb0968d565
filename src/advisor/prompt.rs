use crate::engine::board::Board;
use crate::engine::legal::AllowedMoves;

/// Render the instructions sent alongside a board when asking for a move recommendation.
pub(crate) fn render(board: &Board, allowed: &AllowedMoves) -> String {
    let rows = board
        .rows()
        .iter()
        .map(|row| {
            row.iter()
                .map(|t| t.to_string())
                .collect::<Vec<_>>()
                .join(",")
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "\
You are playing a game of 2048.

Look at the current board and pick the move that maximizes the score over the long run.
Answer with one of \"up\", \"down\", \"left\" or \"right\".

Keep the analysis short. In your answer give a one or two sentence justification and the move.

Rules:
 - Every number on the board is a power of 2.
 - A move slides every tile in the chosen direction; two tiles with the same number that are
   pushed into each other merge into one tile holding their sum.
 - After a move a new tile appears on a random empty square: a 2 (90% of the time) or a 4.
 - A move in a direction where no tile can slide or merge is invalid.

Legal moves for this board: {allowed}

The board is a 4x4 grid, one row per line with commas between the numbers.
\"0\" marks an empty square.

<BOARD>
{rows}
</BOARD>
"
    )
}
