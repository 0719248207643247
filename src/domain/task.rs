/// A unit of work delivered by the queue: the identifier of a payment to
/// process. Never persisted; the consumer owns it until it is settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingTask {
    pub payload: String,
    pub redelivered: bool,
}

impl ProcessingTask {
    pub fn from_body(body: &[u8], redelivered: bool) -> Self {
        Self {
            payload: String::from_utf8_lossy(body).into_owned(),
            redelivered,
        }
    }
}

/// Consumer-side lifecycle of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Received,
    Retrying { attempt: u32 },
    Acked,
    DeadLettered,
}

impl TaskState {
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Acked | Self::DeadLettered)
    }
}

/// How a finished task is settled with the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Remove the task from the queue for good.
    Ack,
    /// Reject without requeue so the broker routes it to the dead-letter path.
    DeadLetter,
}

impl From<Disposition> for TaskState {
    fn from(disposition: Disposition) -> Self {
        match disposition {
            Disposition::Ack => Self::Acked,
            Disposition::DeadLetter => Self::DeadLettered,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_from_body() {
        let task = ProcessingTask::from_body(b"67e55044-10b1-426f-9247-bb680e5fe0c8", true);
        assert_eq!(task.payload, "67e55044-10b1-426f-9247-bb680e5fe0c8");
        assert!(task.redelivered);

        let garbled = ProcessingTask::from_body(&[0xff, 0xfe], false);
        assert!(!garbled.payload.is_empty());
    }

    #[test]
    fn test_only_ack_and_dead_letter_settle() {
        assert!(!TaskState::Received.is_settled());
        assert!(!TaskState::Retrying { attempt: 1 }.is_settled());
        assert!(TaskState::from(Disposition::Ack).is_settled());
        assert_eq!(
            TaskState::from(Disposition::DeadLetter),
            TaskState::DeadLettered
        );
    }
}
