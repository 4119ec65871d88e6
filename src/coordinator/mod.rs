//! Turn-taking coordination between the board widget and the engine.
//!
//! The coordinator is a two-state machine: `AwaitingHumanMove` accepts
//! drag-drop events, `EngineThinking` refuses them while a reply is
//! outstanding. Engine requests run on a worker thread and come back over a
//! channel tagged with a request id; replies for anything but the currently
//! outstanding request are discarded, so a reset or a timed-out request can
//! never smuggle a stale move into the store.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chess::{ChessMove, Square};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::engines::{ChessEngine, EngineError};
use crate::position::{fen, FenError, Position, PositionStore};

/// The board rendering capability. Stateless with respect to the game: it is
/// handed a full position to draw and reports nothing back except drag-drops,
/// which the host forwards to [`TurnCoordinator::on_piece_drop`].
pub trait BoardView {
    fn render(&mut self, position: &Position);
    /// Visually reverts an illegal drag attempt.
    fn reject_drop(&mut self, from: Square, to: Square);
    /// Mirrors the coordinator's thinking flag into the UI.
    fn set_thinking(&mut self, thinking: bool);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    AwaitingHumanMove,
    EngineThinking,
}

/// What became of a drag-drop event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropOutcome {
    /// Legal move, applied and rendered; the engine turn has been scheduled.
    Applied,
    /// Illegal move, board reverted, nothing changed.
    Rejected,
    /// Dropped while the engine was thinking; not even looked at.
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    /// No engine request outstanding.
    Idle,
    /// Request outstanding, no reply yet.
    Thinking,
    /// The engine's move was validated, applied and rendered.
    Moved(ChessMove),
}

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("engine failed: {0}")]
    Engine(#[from] EngineError),
    #[error("engine did not reply within {0:?}")]
    Timeout(Duration),
    /// The engine replied with something that is not a legal move in the
    /// current position. The store is untouched; the reply is carried for
    /// diagnostics.
    #[error("engine returned an illegal move: {reply}")]
    IllegalEngineMove { reply: String },
}

struct EngineReply {
    request_id: u64,
    result: Result<String, EngineError>,
}

#[derive(Clone, Copy)]
struct Outstanding {
    request_id: u64,
    deadline: Option<Instant>,
}

/// Owns the canonical position, the turn state and the thinking flag, and is
/// the only writer of all three.
pub struct TurnCoordinator<E, V> {
    store: PositionStore,
    engine: Arc<E>,
    view: V,
    state: TurnState,
    next_request_id: u64,
    outstanding: Option<Outstanding>,
    reply_tx: Sender<EngineReply>,
    reply_rx: Receiver<EngineReply>,
    engine_timeout: Option<Duration>,
}

impl<E, V> TurnCoordinator<E, V>
where
    E: ChessEngine + 'static,
    V: BoardView,
{
    /// Starts a session at the standard starting position and renders it.
    pub fn new(engine: Arc<E>, view: V) -> Self {
        Self::with_store(engine, view, PositionStore::new())
    }

    /// Starts a session from an arbitrary FEN.
    pub fn from_fen(engine: Arc<E>, view: V, fen_str: &str) -> Result<Self, FenError> {
        Ok(Self::with_store(engine, view, PositionStore::from_fen(fen_str)?))
    }

    fn with_store(engine: Arc<E>, mut view: V, store: PositionStore) -> Self {
        let (reply_tx, reply_rx) = unbounded();
        view.render(&store.current());
        view.set_thinking(false);
        Self {
            store,
            engine,
            view,
            state: TurnState::AwaitingHumanMove,
            next_request_id: 0,
            outstanding: None,
            reply_tx,
            reply_rx,
            engine_timeout: None,
        }
    }

    /// Caps how long a single engine request may stay outstanding. When the
    /// deadline passes, the next poll reports [`TurnError::Timeout`], the
    /// session returns to `AwaitingHumanMove` and the late reply, should it
    /// ever arrive, is discarded.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.engine_timeout = Some(timeout);
        self
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    /// True while an engine request is outstanding.
    pub fn is_thinking(&self) -> bool {
        self.state == TurnState::EngineThinking
    }

    pub fn position(&self) -> Position {
        self.store.current()
    }

    pub fn moves_played(&self) -> &[ChessMove] {
        self.store.history()
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    pub fn view_mut(&mut self) -> &mut V {
        &mut self.view
    }

    /// Handles a drag-drop reported by the board widget.
    ///
    /// In `EngineThinking` the event is ignored outright. Otherwise the
    /// candidate move (promotion defaulted to queen) goes through the same
    /// validation as everything else: a rejection reverts the board and
    /// changes nothing, a success renders the new position *before* the
    /// engine request is dispatched.
    pub fn on_piece_drop(&mut self, from: Square, to: Square) -> DropOutcome {
        if self.state == TurnState::EngineThinking {
            debug!(%from, %to, "drop ignored while engine is thinking");
            return DropOutcome::Ignored;
        }

        let candidate = self.store.current().candidate_move(from, to);
        match self.store.validate_and_apply(candidate) {
            Err(err) => {
                info!(%err, "human move rejected");
                self.view.reject_drop(from, to);
                DropOutcome::Rejected
            }
            Ok(position) => {
                self.view.render(&position);
                self.state = TurnState::EngineThinking;
                self.view.set_thinking(true);
                self.dispatch_engine_request(position);
                DropOutcome::Applied
            }
        }
    }

    /// Asks the engine to move in the current position without a preceding
    /// human move. Lets the engine play White, or retry after a timeout.
    /// Does nothing if a request is already outstanding.
    pub fn request_engine_move(&mut self) {
        if self.state == TurnState::EngineThinking {
            return;
        }
        let position = self.store.current();
        self.state = TurnState::EngineThinking;
        self.view.set_thinking(true);
        self.dispatch_engine_request(position);
    }

    /// Non-blocking check for an engine reply. Hosts call this from their
    /// event loop; the reply hand-off therefore happens on the owning thread,
    /// and the position update and thinking-flag clear are a single step.
    pub fn poll_engine(&mut self) -> Result<EngineStatus, TurnError> {
        if self.state != TurnState::EngineThinking {
            // left-overs from an orphaned request
            while let Ok(reply) = self.reply_rx.try_recv() {
                debug!(reply.request_id, "discarding orphaned engine reply");
            }
            return Ok(EngineStatus::Idle);
        }

        while let Ok(reply) = self.reply_rx.try_recv() {
            if let Some(status) = self.handle_reply(reply)? {
                return Ok(status);
            }
        }
        self.check_deadline()?;
        Ok(EngineStatus::Thinking)
    }

    /// Blocks until the outstanding request resolves or `max_wait` passes.
    /// Returns `Thinking` if the wait budget runs out first; the request
    /// itself stays outstanding in that case.
    pub fn wait_for_engine(&mut self, max_wait: Duration) -> Result<EngineStatus, TurnError> {
        let wait_deadline = Instant::now() + max_wait;
        loop {
            match self.poll_engine()? {
                EngineStatus::Thinking => {}
                status => return Ok(status),
            }

            let mut recv_deadline = wait_deadline;
            if let Some(Outstanding {
                deadline: Some(deadline),
                ..
            }) = self.outstanding
            {
                recv_deadline = recv_deadline.min(deadline);
            }
            match self.reply_rx.recv_deadline(recv_deadline) {
                Ok(reply) => {
                    if let Some(status) = self.handle_reply(reply)? {
                        return Ok(status);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.check_deadline()?;
                    if Instant::now() >= wait_deadline {
                        return Ok(EngineStatus::Thinking);
                    }
                }
                // we hold our own sender, so this cannot happen
                Err(RecvTimeoutError::Disconnected) => return Ok(EngineStatus::Thinking),
            }
        }
    }

    /// Resets to the session's start position. Any outstanding request is
    /// orphaned; its reply will not match and gets discarded.
    pub fn new_game(&mut self) {
        self.outstanding = None;
        self.state = TurnState::AwaitingHumanMove;
        let position = self.store.reset();
        self.view.render(&position);
        self.view.set_thinking(false);
        info!("new game");
    }

    fn dispatch_engine_request(&mut self, position: Position) {
        let request_id = self.next_request_id;
        self.next_request_id += 1;
        self.outstanding = Some(Outstanding {
            request_id,
            deadline: self.engine_timeout.map(|t| Instant::now() + t),
        });

        let fen_str = position.as_fen();
        let engine = Arc::clone(&self.engine);
        let reply_tx = self.reply_tx.clone();
        debug!(request_id, fen = %fen_str, "engine request dispatched");
        thread::spawn(move || {
            let result = engine.compute_move(&fen_str);
            // the coordinator may be gone by now; a closed channel is fine
            let _ = reply_tx.send(EngineReply { request_id, result });
        });
    }

    /// Applies a reply if it belongs to the outstanding request. `Ok(None)`
    /// means the reply was stale and the caller should keep waiting.
    fn handle_reply(&mut self, reply: EngineReply) -> Result<Option<EngineStatus>, TurnError> {
        match self.outstanding {
            Some(outstanding) if outstanding.request_id == reply.request_id => {}
            _ => {
                warn!(reply.request_id, "discarding stale engine reply");
                return Ok(None);
            }
        }
        self.outstanding = None;

        let reply_str = match reply.result {
            Ok(reply_str) => reply_str,
            Err(err) => {
                error!(%err, "engine request failed");
                self.finish_turn_without_move();
                return Err(TurnError::Engine(err));
            }
        };

        let Some(mv) = fen::parse_move(&reply_str) else {
            error!(reply = %reply_str, "engine reply is not a move");
            self.finish_turn_without_move();
            return Err(TurnError::IllegalEngineMove { reply: reply_str });
        };

        // the engine goes through the same validation path as the human
        match self.store.validate_and_apply(mv) {
            Ok(position) => {
                self.state = TurnState::AwaitingHumanMove;
                self.view.render(&position);
                self.view.set_thinking(false);
                info!(mv = %fen::format_move(mv), "engine move applied");
                Ok(Some(EngineStatus::Moved(mv)))
            }
            Err(err) => {
                error!(%err, "engine returned an illegal move");
                self.finish_turn_without_move();
                Err(TurnError::IllegalEngineMove { reply: reply_str })
            }
        }
    }

    fn check_deadline(&mut self) -> Result<(), TurnError> {
        if let Some(Outstanding {
            deadline: Some(deadline),
            ..
        }) = self.outstanding
        {
            if Instant::now() >= deadline {
                let timeout = self.engine_timeout.unwrap_or_default();
                warn!(?timeout, "engine request timed out");
                self.finish_turn_without_move();
                return Err(TurnError::Timeout(timeout));
            }
        }
        Ok(())
    }

    /// Recovery path shared by engine failure, timeout and illegal replies:
    /// clear the thinking flag and hand the turn back so the session is not
    /// stuck. The store was never touched.
    fn finish_turn_without_move(&mut self) {
        self.outstanding = None;
        self.state = TurnState::AwaitingHumanMove;
        self.view.set_thinking(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::INITIAL_POSITION;
    use chess::Piece;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingView {
        rendered: Vec<String>,
        rejected: Vec<(Square, Square)>,
        thinking: Vec<bool>,
    }

    impl BoardView for RecordingView {
        fn render(&mut self, position: &Position) {
            self.rendered.push(position.as_fen());
        }
        fn reject_drop(&mut self, from: Square, to: Square) {
            self.rejected.push((from, to));
        }
        fn set_thinking(&mut self, thinking: bool) {
            self.thinking.push(thinking);
        }
    }

    /// Replies with a fixed script, one entry per request.
    struct ScriptedEngine {
        replies: Mutex<VecDeque<Result<String, EngineError>>>,
        delay: Duration,
    }

    impl ScriptedEngine {
        fn new(replies: &[&str]) -> Self {
            Self {
                replies: Mutex::new(replies.iter().map(|r| Ok(r.to_string())).collect()),
                delay: Duration::ZERO,
            }
        }

        fn failing() -> Self {
            let mut replies = VecDeque::new();
            replies.push_back(Err(EngineError::Unavailable("engine crashed".into())));
            Self {
                replies: Mutex::new(replies),
                delay: Duration::ZERO,
            }
        }

        fn slow(reply: &str, delay: Duration) -> Self {
            let mut engine = Self::new(&[reply, reply]);
            engine.delay = delay;
            engine
        }
    }

    impl ChessEngine for ScriptedEngine {
        fn name(&self) -> &str {
            "scripted"
        }
        fn compute_move(&self, _fen: &str) -> Result<String, EngineError> {
            if !self.delay.is_zero() {
                thread::sleep(self.delay);
            }
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(EngineError::Unavailable("script exhausted".into())))
        }
        fn evaluate(&self, _fen: &str) -> Result<i32, EngineError> {
            Ok(0)
        }
    }

    fn coordinator(replies: &[&str]) -> TurnCoordinator<ScriptedEngine, RecordingView> {
        TurnCoordinator::new(Arc::new(ScriptedEngine::new(replies)), RecordingView::default())
    }

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn test_full_turn_cycle() {
        let mut coordinator = coordinator(&["e7e5"]);
        // initial render, thinking indicator off from the start
        assert_eq!(coordinator.view().rendered.len(), 1);
        assert_eq!(coordinator.view().thinking, vec![false]);

        assert_eq!(coordinator.on_piece_drop(Square::E2, Square::E4), DropOutcome::Applied);
        assert_eq!(coordinator.state(), TurnState::EngineThinking);
        assert!(coordinator.is_thinking());
        // the human's move is on screen before the engine answers
        assert!(coordinator.view().rendered.last().unwrap().contains("4P3"));

        let status = coordinator.wait_for_engine(WAIT).unwrap();
        assert_eq!(status, EngineStatus::Moved(fen::parse_move("e7e5").unwrap()));
        assert_eq!(coordinator.state(), TurnState::AwaitingHumanMove);
        assert!(!coordinator.is_thinking());
        assert_eq!(coordinator.view().thinking, vec![false, true, false]);
        assert_eq!(coordinator.position().fullmove_number(), 2);
        assert_eq!(coordinator.view().rendered.len(), 3);
        assert_eq!(coordinator.moves_played().len(), 2);
    }

    #[test]
    fn test_illegal_drop_is_rejected_in_place() {
        let mut coordinator = coordinator(&[]);
        assert_eq!(coordinator.on_piece_drop(Square::E2, Square::E5), DropOutcome::Rejected);
        assert_eq!(coordinator.state(), TurnState::AwaitingHumanMove);
        assert_eq!(coordinator.position().as_fen(), INITIAL_POSITION);
        assert_eq!(coordinator.view().rejected, vec![(Square::E2, Square::E5)]);
        // a synchronous rejection never touches the thinking flag
        assert_eq!(coordinator.view().thinking, vec![false]);
    }

    #[test]
    fn test_drop_while_thinking_is_ignored() {
        let mut coordinator = coordinator(&["e7e5"]);
        coordinator.on_piece_drop(Square::E2, Square::E4);
        let position_before = coordinator.position();

        assert_eq!(coordinator.on_piece_drop(Square::D2, Square::D4), DropOutcome::Ignored);
        assert_eq!(coordinator.position(), position_before);
        assert!(coordinator.is_thinking());
        assert_eq!(coordinator.view().thinking, vec![false, true]);

        // the engine turn still resolves normally afterwards
        assert!(matches!(
            coordinator.wait_for_engine(WAIT).unwrap(),
            EngineStatus::Moved(_)
        ));
    }

    #[test]
    fn test_poll_without_request_is_idle() {
        let mut coordinator = coordinator(&[]);
        assert_eq!(coordinator.poll_engine().unwrap(), EngineStatus::Idle);
    }

    #[test]
    fn test_stale_reply_is_discarded_after_new_game() {
        let mut coordinator = coordinator(&["e7e5", "b8c6"]);
        coordinator.on_piece_drop(Square::E2, Square::E4);
        coordinator.new_game();
        assert_eq!(coordinator.position().as_fen(), INITIAL_POSITION);
        assert_eq!(coordinator.poll_engine().unwrap(), EngineStatus::Idle);

        // the new request is answered by the second script entry; the orphaned
        // first reply must not leak into the fresh game
        coordinator.on_piece_drop(Square::E2, Square::E4);
        let status = coordinator.wait_for_engine(WAIT).unwrap();
        assert_eq!(status, EngineStatus::Moved(fen::parse_move("b8c6").unwrap()));
        let position = coordinator.position();
        assert_eq!(position.board().piece_on(Square::C6), Some(Piece::Knight));
        assert_eq!(position.board().piece_on(Square::E5), None);
    }

    #[test]
    fn test_illegal_engine_reply_is_surfaced_not_applied() {
        // after 1.e4 it is Black's turn; "e2e4" is not available
        let mut coordinator = coordinator(&["e2e4"]);
        coordinator.on_piece_drop(Square::E2, Square::E4);
        let position_before = coordinator.position();

        let err = coordinator.wait_for_engine(WAIT).unwrap_err();
        assert!(matches!(err, TurnError::IllegalEngineMove { ref reply } if reply == "e2e4"));
        assert_eq!(coordinator.position(), position_before);
        assert_eq!(coordinator.state(), TurnState::AwaitingHumanMove);
        assert_eq!(coordinator.view().thinking, vec![false, true, false]);
    }

    #[test]
    fn test_unparseable_engine_reply_is_surfaced() {
        let mut coordinator = coordinator(&["xyzzy"]);
        coordinator.on_piece_drop(Square::E2, Square::E4);
        assert!(matches!(
            coordinator.wait_for_engine(WAIT),
            Err(TurnError::IllegalEngineMove { .. })
        ));
        assert_eq!(coordinator.state(), TurnState::AwaitingHumanMove);
    }

    #[test]
    fn test_engine_failure_recovers_the_session() {
        let mut coordinator = TurnCoordinator::new(
            Arc::new(ScriptedEngine::failing()),
            RecordingView::default(),
        );
        coordinator.on_piece_drop(Square::E2, Square::E4);
        assert!(matches!(
            coordinator.wait_for_engine(WAIT),
            Err(TurnError::Engine(EngineError::Unavailable(_)))
        ));
        assert_eq!(coordinator.state(), TurnState::AwaitingHumanMove);
        assert!(!coordinator.is_thinking());
        // the human's move survived; only the engine turn failed
        assert!(coordinator.position().as_fen().contains("4P3"));
    }

    #[test]
    fn test_engine_timeout_recovers_and_discards_late_reply() {
        let engine = ScriptedEngine::slow("e7e5", Duration::from_millis(300));
        let mut coordinator = TurnCoordinator::new(Arc::new(engine), RecordingView::default())
            .with_timeout(Duration::from_millis(30));
        coordinator.on_piece_drop(Square::E2, Square::E4);

        assert!(matches!(
            coordinator.wait_for_engine(WAIT),
            Err(TurnError::Timeout(_))
        ));
        assert_eq!(coordinator.state(), TurnState::AwaitingHumanMove);
        assert!(!coordinator.is_thinking());

        // once the late reply lands it is silently dropped
        thread::sleep(Duration::from_millis(400));
        assert_eq!(coordinator.poll_engine().unwrap(), EngineStatus::Idle);
        assert!(coordinator.position().as_fen().contains("4P3"));
    }

    #[test]
    fn test_wait_budget_expiry_keeps_request_outstanding() {
        let engine = ScriptedEngine::slow("e7e5", Duration::from_millis(200));
        let mut coordinator = TurnCoordinator::new(Arc::new(engine), RecordingView::default());
        coordinator.on_piece_drop(Square::E2, Square::E4);

        let status = coordinator.wait_for_engine(Duration::from_millis(20)).unwrap();
        assert_eq!(status, EngineStatus::Thinking);
        assert!(coordinator.is_thinking());

        // waiting long enough resolves the same request
        assert!(matches!(
            coordinator.wait_for_engine(WAIT).unwrap(),
            EngineStatus::Moved(_)
        ));
    }

    #[test]
    fn test_request_engine_move_without_human_move() {
        let mut coordinator = coordinator(&["e2e4"]);
        coordinator.request_engine_move();
        assert!(coordinator.is_thinking());
        // a second request while thinking is a no-op
        coordinator.request_engine_move();

        let status = coordinator.wait_for_engine(WAIT).unwrap();
        assert_eq!(status, EngineStatus::Moved(fen::parse_move("e2e4").unwrap()));
        assert_eq!(coordinator.state(), TurnState::AwaitingHumanMove);
    }

    #[test]
    fn test_session_from_custom_fen() {
        let fen_str = "8/P6k/8/8/8/8/8/K7 w - - 0 1";
        let mut coordinator = TurnCoordinator::from_fen(
            Arc::new(ScriptedEngine::new(&["h7g6"])),
            RecordingView::default(),
            fen_str,
        )
        .unwrap();
        assert_eq!(coordinator.position().as_fen(), fen_str);

        // promotion defaulted to queen on the drag
        assert_eq!(coordinator.on_piece_drop(Square::A7, Square::A8), DropOutcome::Applied);
        assert_eq!(
            coordinator.position().board().piece_on(Square::A8),
            Some(Piece::Queen)
        );
        coordinator.wait_for_engine(WAIT).unwrap();
        assert_eq!(coordinator.moves_played().len(), 2);
    }

    #[test]
    fn test_engine_reports_no_move_when_mated() {
        // one move before the fool's mate, Black (the human) to deliver it
        let mut coordinator = TurnCoordinator::from_fen(
            Arc::new(crate::engines::MinMaxEngine::default()),
            RecordingView::default(),
            "rnbqkbnr/pppp1ppp/8/4p3/6P1/5P2/PPPPP2P/RNBQKBNR b KQkq - 0 2",
        )
        .unwrap();
        assert_eq!(coordinator.on_piece_drop(Square::D8, Square::H4), DropOutcome::Applied);
        assert!(matches!(
            coordinator.wait_for_engine(WAIT),
            Err(TurnError::Engine(EngineError::NoMoveAvailable))
        ));
        assert_eq!(coordinator.state(), TurnState::AwaitingHumanMove);
        assert!(!coordinator.is_thinking());
    }

    #[test]
    fn test_evaluation_path_leaves_game_state_alone() {
        let mut coordinator = coordinator(&["e7e5"]);
        coordinator.on_piece_drop(Square::E2, Square::E4);
        let position_before = coordinator.position();

        // analysis of an arbitrary constructed position, independent of the turn
        let engine = crate::engines::MinMaxEngine::default();
        let score = engine.evaluate("4k3/8/8/8/8/8/8/4K3 w - - 0 1").unwrap();
        assert_eq!(score, 0);

        assert_eq!(coordinator.position(), position_before);
        assert!(coordinator.is_thinking());
        coordinator.wait_for_engine(WAIT).unwrap();
    }
}
