use crate::error::{Error, Result};
use tokio_util::sync::CancellationToken;

// Trait for types that have x,y coordinates
pub trait Coord {
    fn x(&self) -> i64;
    fn y(&self) -> i64;
}

// Generalized distance function for any type implementing Coord
pub fn distance<T: Coord>(a: &T, b: &T) -> i64 {
    if a.x() == b.x() && a.y() == b.y() {
        return 0;
    }
    let d2 = (a.x() - b.x()).pow(2) + (a.y() - b.y()).pow(2);
    std::cmp::max(1, (d2 as f64).sqrt().round() as i64)
}

/// Sleep that aborts with `Error::Cancelled` when the token fires.
/// Every worker suspension point goes through here or an equivalent select.
pub async fn sleep(token: &CancellationToken, duration: std::time::Duration) -> Result<()> {
    tokio::select! {
        _ = token.cancelled() => Err(Error::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

/// Receive with cancellation. `None` (channel closed) maps to `Cancelled`
/// as well: a closed channel means the counterpart is shutting down.
pub async fn recv<T>(
    token: &CancellationToken,
    rx: &mut tokio::sync::mpsc::Receiver<T>,
) -> Result<T> {
    tokio::select! {
        _ = token.cancelled() => Err(Error::Cancelled),
        msg = rx.recv() => msg.ok_or(Error::Cancelled),
    }
}

/// Receive with cancellation and a timeout; `Ok(None)` on timeout.
pub async fn recv_timeout<T>(
    token: &CancellationToken,
    rx: &mut tokio::sync::mpsc::Receiver<T>,
    timeout: std::time::Duration,
) -> Result<Option<T>> {
    tokio::select! {
        _ = token.cancelled() => Err(Error::Cancelled),
        _ = tokio::time::sleep(timeout) => Ok(None),
        msg = rx.recv() => msg.map(Some).ok_or(Error::Cancelled),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct P(i64, i64);
    impl Coord for P {
        fn x(&self) -> i64 {
            self.0
        }
        fn y(&self) -> i64 {
            self.1
        }
    }

    #[test]
    fn test_distance() {
        assert_eq!(distance(&P(0, 0), &P(0, 0)), 0);
        assert_eq!(distance(&P(0, 0), &P(3, 4)), 5);
        // distinct waypoints are never closer than 1
        assert_eq!(distance(&P(0, 0), &P(0, 1)), 1);
    }

    #[tokio::test]
    async fn test_cancelled_sleep() {
        let token = CancellationToken::new();
        token.cancel();
        let result = sleep(&token, std::time::Duration::from_secs(60)).await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
