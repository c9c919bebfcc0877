//! Caller identity used for resource ownership

use std::fmt;
use std::thread::{self, ThreadId};

/// Identity of the caller holding a resource.
///
/// Inside a tokio task this is the task id, so ownership survives the task
/// hopping between worker threads. Everywhere else it is the thread id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OwnerId {
    Thread(ThreadId),
    Task(tokio::task::Id),
}

impl OwnerId {
    /// Identity of the calling thread or task
    pub fn current() -> Self {
        match tokio::task::try_id() {
            Some(id) => OwnerId::Task(id),
            None => OwnerId::Thread(thread::current().id()),
        }
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OwnerId::Thread(id) => write!(f, "thread {:?}", id),
            OwnerId::Task(id) => write!(f, "task {}", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_identity() {
        let here = OwnerId::current();
        assert_eq!(here, OwnerId::current());

        let there = thread::spawn(OwnerId::current).join().unwrap();
        assert_ne!(here, there);
        assert!(matches!(there, OwnerId::Thread(_)));
    }

    #[tokio::test]
    async fn test_task_identity() {
        let outer = OwnerId::current();
        let inner = tokio::spawn(async { OwnerId::current() }).await.unwrap();

        assert!(matches!(inner, OwnerId::Task(_)));
        assert_ne!(outer, inner);
    }
}
