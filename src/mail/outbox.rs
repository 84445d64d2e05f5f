use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{MailError, MailSender, OutgoingMail};

/// Handle for queueing mail without waiting for delivery.
#[derive(Clone)]
pub struct MailOutbox {
    tx: mpsc::Sender<OutgoingMail>,
}

/// The task delivering queued mail. It stops once every [`MailOutbox`]
/// handle has been dropped and the queue is empty.
pub struct OutboxWorker {
    handle: JoinHandle<usize>,
}

impl MailOutbox {
    /// Spawns the delivery task on the current runtime.
    pub fn start(sender: Arc<dyn MailSender>, capacity: usize) -> (Self, OutboxWorker) {
        let (tx, rx) = mpsc::channel::<OutgoingMail>(capacity.max(1));
        info!(capacity = capacity.max(1), "starting mail outbox");
        let handle = tokio::spawn(deliver(sender, rx));
        (Self { tx }, OutboxWorker { handle })
    }

    /// Never waits: a full or closed queue is reported back immediately.
    pub fn enqueue(&self, mail: OutgoingMail) -> Result<(), MailError> {
        match self.tx.try_send(mail) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(mail)) => {
                warn!(to = %mail.to, "mail queue full, dropping message");
                Err(MailError::QueueFull)
            }
            Err(TrySendError::Closed(mail)) => {
                warn!(to = %mail.to, "mail queue closed, dropping message");
                Err(MailError::QueueClosed)
            }
        }
    }
}

impl OutboxWorker {
    /// Waits for queued mail to be attempted. Returns the number of messages
    /// delivered, or `None` if the deadline passed first.
    pub async fn drain(self, deadline: Duration) -> Option<usize> {
        match tokio::time::timeout(deadline, self.handle).await {
            Ok(Ok(delivered)) => Some(delivered),
            Ok(Err(e)) => {
                error!(error = %e, "mail outbox task failed");
                None
            }
            Err(_) => {
                warn!("mail outbox did not drain before the deadline");
                None
            }
        }
    }
}

async fn deliver(sender: Arc<dyn MailSender>, mut rx: mpsc::Receiver<OutgoingMail>) -> usize {
    let mut delivered = 0;
    while let Some(mail) = rx.recv().await {
        match sender.send(&mail).await {
            Ok(()) => {
                delivered += 1;
                debug!(to = %mail.to, subject = %mail.subject, "mail delivered");
            }
            Err(e) => {
                error!(to = %mail.to, subject = %mail.subject, error = %e, "mail delivery failed");
            }
        }
    }
    info!(delivered, "mail outbox stopped");
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        sent: Mutex<Vec<OutgoingMail>>,
        fail_for: Option<String>,
    }

    #[async_trait]
    impl MailSender for Recording {
        async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
            if self.fail_for.as_deref() == Some(mail.to.as_str()) {
                return Err(MailError::Transport("smtp down".into()));
            }
            self.sent.lock().unwrap().push(mail.clone());
            Ok(())
        }
    }

    fn mail(to: &str) -> OutgoingMail {
        OutgoingMail {
            to: to.into(),
            subject: "s".into(),
            body: "b".into(),
        }
    }

    #[tokio::test]
    async fn queued_mail_is_delivered_on_drain() {
        let recorder = Arc::new(Recording::default());
        let (outbox, worker) = MailOutbox::start(recorder.clone(), 8);
        outbox.enqueue(mail("a@x.com")).unwrap();
        outbox.enqueue(mail("b@x.com")).unwrap();
        drop(outbox);

        assert_eq!(worker.drain(Duration::from_secs(5)).await, Some(2));
        let sent = recorder.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].to, "a@x.com");
    }

    #[tokio::test]
    async fn failed_delivery_does_not_stop_the_worker() {
        let recorder = Arc::new(Recording {
            fail_for: Some("bad@x.com".into()),
            ..Default::default()
        });
        let (outbox, worker) = MailOutbox::start(recorder.clone(), 8);
        outbox.enqueue(mail("bad@x.com")).unwrap();
        outbox.enqueue(mail("good@x.com")).unwrap();
        drop(outbox);

        assert_eq!(worker.drain(Duration::from_secs(5)).await, Some(1));
        assert_eq!(recorder.sent.lock().unwrap()[0].to, "good@x.com");
    }

    #[tokio::test]
    async fn full_queue_rejects_without_waiting() {
        let recorder = Arc::new(Recording::default());
        let (outbox, worker) = MailOutbox::start(recorder, 1);
        // current-thread runtime: the worker cannot run until we yield
        outbox.enqueue(mail("a@x.com")).unwrap();
        assert!(matches!(
            outbox.enqueue(mail("b@x.com")),
            Err(MailError::QueueFull)
        ));
        drop(outbox);
        assert_eq!(worker.drain(Duration::from_secs(5)).await, Some(1));
    }
}
