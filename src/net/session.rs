//! Per-connection session handler

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
    WriteHalf,
};
use tokio::sync::broadcast;
use tracing::{debug, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

use crate::app::AppState;
use crate::config::DisconnectPolicy;
use crate::game::commands;
use crate::game::world::MatchPhase;
use crate::net::protocol::{ClientMsg, ServerMsg};
use crate::util::rate_limit::SessionRateLimiter;

/// Longest accepted protocol line in bytes, newline excluded
pub const MAX_LINE_LEN: usize = 1024;

/// One line read off the connection
#[derive(Debug)]
enum Inbound {
    Line(String),
    /// Not UTF-8, or longer than `MAX_LINE_LEN`
    Garbled,
}

/// Own one connection end to end: handshake, command loop, teardown
pub async fn handle_connection<S>(stream: S, peer: SocketAddr, state: AppState)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let session_id = Uuid::new_v4();
    let span = info_span!("session", %session_id, %peer);
    run_session(stream, state).instrument(span).await;
}

async fn run_session<S>(stream: S, state: AppState)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let read_timeout = state.config.read_timeout;
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::with_capacity(128);

    // Join handshake
    let first = match next_line(&mut reader, &mut buf, read_timeout).await {
        Some(Inbound::Line(line)) => line,
        Some(Inbound::Garbled) => {
            debug!("Garbled handshake, closing");
            return;
        }
        None => {
            debug!("Connection closed before handshake");
            return;
        }
    };
    let (name, skin) = match first.parse::<ClientMsg>() {
        Ok(ClientMsg::Select { name, skin }) => (name, skin),
        Ok(other) => {
            debug!(msg = ?other, "Expected SELECT, closing");
            return;
        }
        Err(e) => {
            debug!(error = %e, "Malformed handshake, closing");
            return;
        }
    };

    let world = state.world.clone();
    let player = match world.join(&name, &skin) {
        Ok(player) => player,
        Err(err) => {
            info!(player = %name, reason = %err, "Join rejected");
            let _ = send_msg(&mut writer, &ServerMsg::Rejected(err)).await;
            let _ = writer.shutdown().await;
            return;
        }
    };

    // Subscribe before replying so nothing published after SUCCESS is missed
    let outbound = world.subscribe();
    if let Err(e) = send_msg(&mut writer, &ServerMsg::Success).await {
        debug!(player = %name, error = %e, "Failed to send SUCCESS");
        world.remove_player(&name);
        return;
    }
    info!(
        player = %name,
        skin = %skin,
        x = player.x,
        y = player.y,
        players = world.player_count(),
        "Player joined"
    );

    // Writer task: broadcasts -> connection
    let writer_handle = tokio::spawn(
        forward_outbound(writer, outbound, name.clone()).instrument(Span::current()),
    );

    // Reader loop: connection -> command interpreter
    let limiter = SessionRateLimiter::new(state.config.input_rate_limit);
    while let Some(inbound) = next_line(&mut reader, &mut buf, read_timeout).await {
        if let Some(limiter) = &limiter {
            if !limiter.check_line() {
                debug!(player = %name, "Rate limited command line");
                continue;
            }
        }

        let Inbound::Line(line) = inbound else {
            debug!(player = %name, "Ignoring garbled line");
            continue;
        };
        match line.parse::<ClientMsg>() {
            Ok(msg) => commands::dispatch(&world, &name, msg),
            Err(e) => debug!(player = %name, error = %e, line = %line, "Ignoring malformed line"),
        }
    }

    // Teardown: unconditional removal, not a death
    let phase = world.phase();
    if let Some(removed) = world.remove_player(&name) {
        if state.config.disconnect_policy == DisconnectPolicy::Announce
            && phase == MatchPhase::Active
            && removed.alive
        {
            world.publish(ServerMsg::Dead { name: name.clone() });
        }
    }

    writer_handle.abort();
    let _ = writer_handle.await;

    info!(player = %name, players = world.player_count(), "Player left");
}

/// Next protocol line, or `None` on end-of-stream, I/O error or idle timeout
async fn next_line<R>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    timeout: Option<Duration>,
) -> Option<Inbound>
where
    R: AsyncBufRead + Unpin,
{
    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, read_bounded_line(reader, buf)).await {
            Ok(result) => result,
            Err(_) => {
                debug!(timeout_secs = limit.as_secs_f32(), "Read timed out");
                return None;
            }
        },
        None => read_bounded_line(reader, buf).await,
    };

    match result {
        Ok(inbound) => inbound,
        Err(e) => {
            debug!(error = %e, "Read failed");
            None
        }
    }
}

/// Read up to the next `\n`, holding at most `MAX_LINE_LEN + 1` bytes in
/// `buf`. The remainder of an oversized line is read and discarded.
async fn read_bounded_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<Option<Inbound>>
where
    R: AsyncBufRead + Unpin,
{
    let mut oversized = false;
    loop {
        buf.clear();
        let n = (&mut *reader)
            .take(MAX_LINE_LEN as u64 + 1)
            .read_until(b'\n', buf)
            .await?;

        if n == 0 {
            if oversized {
                return Ok(Some(Inbound::Garbled));
            }
            return Ok(None);
        }
        if buf.last() == Some(&b'\n') {
            break;
        }
        if buf.len() > MAX_LINE_LEN {
            oversized = true;
            continue;
        }
        // Unterminated tail before end-of-stream
        break;
    }

    if oversized {
        return Ok(Some(Inbound::Garbled));
    }

    if buf.last() == Some(&b'\n') {
        buf.pop();
    }
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    match std::str::from_utf8(buf) {
        Ok(line) => Ok(Some(Inbound::Line(line.to_string()))),
        Err(_) => Ok(Some(Inbound::Garbled)),
    }
}

/// Drain the broadcast queue into the connection until either side closes
async fn forward_outbound<W>(
    mut writer: WriteHalf<W>,
    mut outbound: broadcast::Receiver<ServerMsg>,
    name: String,
) where
    W: AsyncWrite,
{
    loop {
        match outbound.recv().await {
            Ok(msg) => {
                // A failed write surfaces as a disconnect on the read side
                if let Err(e) = send_msg(&mut writer, &msg).await {
                    debug!(player = %name, error = %e, "Send failed");
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(player = %name, skipped = n, "Client lagged, skipping {} messages", n);
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!(player = %name, "Outbound channel closed");
                break;
            }
        }
    }
}

async fn send_msg<W>(writer: &mut W, msg: &ServerMsg) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(msg.to_line().as_bytes()).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::time::Instant;
    use tokio::io::{duplex, DuplexStream, Lines, ReadHalf};
    use tokio_test::assert_ok;

    fn app(config: Config) -> AppState {
        AppState::new(Config {
            world_seed: Some(9),
            ..config
        })
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    struct TestClient {
        lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
        writer: WriteHalf<DuplexStream>,
    }

    impl TestClient {
        fn connect(state: &AppState) -> Self {
            let (client, server) = duplex(4096);
            tokio::spawn(handle_connection(server, peer(), state.clone()));
            let (reader, writer) = tokio::io::split(client);
            Self {
                lines: BufReader::new(reader).lines(),
                writer,
            }
        }

        async fn send(&mut self, line: &str) {
            self.send_raw(line.as_bytes()).await;
        }

        async fn send_raw(&mut self, bytes: &[u8]) {
            assert_ok!(self.writer.write_all(bytes).await);
            assert_ok!(self.writer.write_all(b"\n").await);
        }

        async fn recv(&mut self) -> Option<String> {
            tokio::time::timeout(Duration::from_secs(2), self.lines.next_line())
                .await
                .expect("timed out waiting for a line")
                .unwrap()
        }
    }

    async fn eventually(what: &str, cond: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out waiting for {}", what);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn rejects_join_once_match_started() {
        let state = app(Config::default());
        *state.world.phase_mut() = MatchPhase::Active;

        let stream = tokio_test::io::Builder::new()
            .read(b"SELECT:late:knight\n")
            .write(b"ERROR:GAME_ALREADY_STARTED\n")
            .build();
        handle_connection(stream, peer(), state.clone()).await;

        assert_eq!(state.world.player_count(), 0);
    }

    #[tokio::test]
    async fn malformed_or_missing_handshake_closes_silently() {
        let state = app(Config::default());

        let stream = tokio_test::io::Builder::new().read(b"HELLO\n").build();
        handle_connection(stream, peer(), state.clone()).await;

        let stream = tokio_test::io::Builder::new().read(b"READY\n").build();
        handle_connection(stream, peer(), state.clone()).await;

        let stream = tokio_test::io::Builder::new().build();
        handle_connection(stream, peer(), state.clone()).await;

        assert_eq!(state.world.player_count(), 0);
    }

    #[tokio::test]
    async fn join_then_disconnect_registers_and_removes() {
        let state = app(Config::default());
        let mut client = TestClient::connect(&state);

        client.send("SELECT:alice:knight").await;
        assert_eq!(client.recv().await.as_deref(), Some("SUCCESS"));
        assert!(state.world.player("alice").is_some());
        assert_eq!(state.world.player("alice").unwrap().skin, "knight");

        drop(client);
        let world = state.world.clone();
        eventually("player removal", || world.player_count() == 0).await;
        assert!(state.world.death_ledger().is_empty());
    }

    #[tokio::test]
    async fn duplicate_name_is_refused() {
        let state = app(Config::default());
        let mut first = TestClient::connect(&state);
        first.send("SELECT:alice:knight").await;
        assert_eq!(first.recv().await.as_deref(), Some("SUCCESS"));

        let mut second = TestClient::connect(&state);
        second.send("SELECT:alice:mage").await;
        assert_eq!(second.recv().await.as_deref(), Some("ERROR:NAME_TAKEN"));
        assert_eq!(second.recv().await, None);

        assert_eq!(state.world.player("alice").unwrap().skin, "knight");
    }

    #[tokio::test]
    async fn bad_lines_do_not_end_the_session() {
        let state = app(Config::default());
        let mut client = TestClient::connect(&state);
        client.send("SELECT:alice:knight").await;
        assert_eq!(client.recv().await.as_deref(), Some("SUCCESS"));

        client.send("GARBAGE").await;
        client.send("MOVE:x").await;
        client.send("PICKUP_SWORD:99").await;
        client.send("READY").await;

        let world = state.world.clone();
        eventually("ready flag", || world.player("alice").map_or(false, |p| p.ready)).await;
    }

    #[tokio::test]
    async fn joined_sessions_receive_broadcasts() {
        let state = app(Config::default());
        let mut client = TestClient::connect(&state);
        client.send("SELECT:alice:knight").await;
        assert_eq!(client.recv().await.as_deref(), Some("SUCCESS"));

        state.world.publish(ServerMsg::StartGame);
        assert_eq!(client.recv().await.as_deref(), Some("START_GAME"));
    }

    #[tokio::test]
    async fn announce_policy_reports_fighters_who_leave() {
        let state = app(Config {
            disconnect_policy: DisconnectPolicy::Announce,
            ..Config::default()
        });
        let mut observer = state.world.subscribe();

        let mut client = TestClient::connect(&state);
        client.send("SELECT:alice:knight").await;
        assert_eq!(client.recv().await.as_deref(), Some("SUCCESS"));
        *state.world.phase_mut() = MatchPhase::Active;

        drop(client);

        match tokio::time::timeout(Duration::from_secs(2), observer.recv()).await {
            Ok(Ok(ServerMsg::Dead { name })) => assert_eq!(name, "alice"),
            other => panic!("expected DEAD, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn silent_policy_emits_nothing_on_leave() {
        let state = app(Config::default());
        let mut observer = state.world.subscribe();

        let mut client = TestClient::connect(&state);
        client.send("SELECT:alice:knight").await;
        assert_eq!(client.recv().await.as_deref(), Some("SUCCESS"));
        *state.world.phase_mut() = MatchPhase::Active;

        drop(client);
        let world = state.world.clone();
        eventually("player removal", || world.player_count() == 0).await;
        assert!(observer.try_recv().is_err());
    }

    #[tokio::test]
    async fn idle_sessions_time_out_when_configured() {
        let state = app(Config {
            read_timeout: Some(Duration::from_millis(50)),
            ..Config::default()
        });
        let mut client = TestClient::connect(&state);
        client.send("SELECT:alice:knight").await;
        assert_eq!(client.recv().await.as_deref(), Some("SUCCESS"));

        let world = state.world.clone();
        eventually("idle removal", || world.player_count() == 0).await;
        assert_eq!(client.recv().await, None);
    }

    #[tokio::test]
    async fn bounded_reader_splits_lines_and_flags_garbage() {
        let mut input: &[u8] = b"READY\r\nMOVE:\xff\xfe:1:UP:true\nATTACK";
        let mut buf = Vec::new();

        let first = read_bounded_line(&mut input, &mut buf).await.unwrap();
        assert!(matches!(first, Some(Inbound::Line(ref l)) if l == "READY"));
        let second = read_bounded_line(&mut input, &mut buf).await.unwrap();
        assert!(matches!(second, Some(Inbound::Garbled)));
        let third = read_bounded_line(&mut input, &mut buf).await.unwrap();
        assert!(matches!(third, Some(Inbound::Line(ref l)) if l == "ATTACK"));
        assert!(read_bounded_line(&mut input, &mut buf).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn bounded_reader_discards_oversized_lines() {
        let mut data = vec![b'A'; MAX_LINE_LEN * 3];
        data.extend_from_slice(b"\nREADY\n");
        let mut input: &[u8] = &data;
        let mut buf = Vec::new();

        let first = read_bounded_line(&mut input, &mut buf).await.unwrap();
        assert!(matches!(first, Some(Inbound::Garbled)));
        assert!(buf.len() <= MAX_LINE_LEN + 1);
        let second = read_bounded_line(&mut input, &mut buf).await.unwrap();
        assert!(matches!(second, Some(Inbound::Line(ref l)) if l == "READY"));
    }

    #[tokio::test]
    async fn invalid_utf8_line_is_ignored() {
        let state = app(Config::default());
        let mut client = TestClient::connect(&state);
        client.send("SELECT:alice:knight").await;
        assert_eq!(client.recv().await.as_deref(), Some("SUCCESS"));

        client.send_raw(b"MOVE:\xff\xfe:1:UP:true").await;
        client.send("READY").await;

        let world = state.world.clone();
        eventually("ready flag", || world.player("alice").map_or(false, |p| p.ready)).await;
        assert_eq!(state.world.player_count(), 1);
    }

    #[tokio::test]
    async fn oversized_line_is_ignored() {
        let state = app(Config::default());
        let mut client = TestClient::connect(&state);
        client.send("SELECT:alice:knight").await;
        assert_eq!(client.recv().await.as_deref(), Some("SUCCESS"));

        client.send_raw(&vec![b'A'; MAX_LINE_LEN * 8]).await;
        client.send("READY").await;

        let world = state.world.clone();
        eventually("ready flag", || world.player("alice").map_or(false, |p| p.ready)).await;
        assert_eq!(state.world.player_count(), 1);
    }

    #[tokio::test]
    async fn lines_over_the_rate_limit_are_dropped() {
        let state = app(Config {
            input_rate_limit: 1,
            ..Config::default()
        });
        let mut client = TestClient::connect(&state);
        client.send("SELECT:alice:knight").await;
        assert_eq!(client.recv().await.as_deref(), Some("SUCCESS"));

        // The second toggle falls outside the one-per-second quota
        client.send("READY").await;
        client.send("READY").await;

        let world = state.world.clone();
        eventually("ready flag", || world.player("alice").map_or(false, |p| p.ready)).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(state.world.player("alice").unwrap().ready);

        // Still connected and receiving
        state.world.publish(ServerMsg::StartGame);
        assert_eq!(client.recv().await.as_deref(), Some("START_GAME"));
        assert_eq!(state.world.player_count(), 1);
    }
}
