//! Event → notification routing.
//!
//! A single dispatch loop pulls events off the queue, resolves each one to
//! zero or more role topics via `ROUTES`, and hands every send to its own
//! task with a timeout. Deliveries are best-effort and never retried.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::error::NotifyError;
use crate::letters::{Letter, LetterStatus, LetterType, Role};
use crate::notify::event::{EventKind, LetterEvent};
use crate::notify::sink::{Notification, NotificationSink};
use crate::store::UserDirectory;

/// Default per-send timeout.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy)]
enum Trigger {
    Created(LetterType),
    Status(LetterStatus),
}

#[derive(Debug, Clone, Copy)]
enum Recipients {
    Role(Role),
    /// The assigned verifier's role, or every manager role for the scope.
    Verifier,
    /// The creator's role, or the staff role for the scope.
    Creator,
    /// The archivist, when the letter is outbound.
    ArchivistForOutbound,
}

struct Route {
    trigger: Trigger,
    recipients: &'static [Recipients],
    title: &'static str,
    /// `{sender}` and `{number}` are filled from the letter.
    body: &'static str,
}

/// Creation routes are consulted first for letters created already
/// published; anything that matches none falls through to the status routes.
static ROUTES: &[Route] = &[
    Route {
        trigger: Trigger::Created(LetterType::Masuk),
        recipients: &[Recipients::Role(Role::Direktur)],
        title: "Surat Masuk Baru",
        body: "Surat dari {sender} menunggu disposisi Anda.",
    },
    Route {
        trigger: Trigger::Status(LetterStatus::AwaitingDisposition),
        recipients: &[Recipients::Role(Role::Direktur)],
        title: "Surat Masuk Baru",
        body: "Surat dari {sender} menunggu disposisi Anda.",
    },
    Route {
        trigger: Trigger::Status(LetterStatus::NeedsVerification),
        recipients: &[Recipients::Verifier],
        title: "Permintaan Verifikasi",
        body: "Surat keluar #{number} menunggu verifikasi Anda.",
    },
    Route {
        trigger: Trigger::Status(LetterStatus::NeedsApproval),
        recipients: &[Recipients::Role(Role::Direktur)],
        title: "Persetujuan Diperlukan",
        body: "Surat #{number} menunggu tanda tangan Anda.",
    },
    Route {
        trigger: Trigger::Status(LetterStatus::NeedsRevision),
        recipients: &[Recipients::Creator],
        title: "Revisi Diperlukan",
        body: "Surat #{number} dikembalikan untuk revisi.",
    },
    Route {
        trigger: Trigger::Status(LetterStatus::Approved),
        recipients: &[Recipients::Creator, Recipients::ArchivistForOutbound],
        title: "Surat Disetujui",
        body: "Surat #{number} telah disetujui Direktur.",
    },
    Route {
        trigger: Trigger::Status(LetterStatus::Disposed),
        recipients: &[Recipients::Creator, Recipients::ArchivistForOutbound],
        title: "Disposisi Turun",
        body: "Surat #{number} telah didisposisi Direktur.",
    },
];

fn find_route(event: &LetterEvent) -> Option<&'static Route> {
    let created = ROUTES.iter().find(|r| {
        event.kind == EventKind::Created
            && event.new_status.is_published()
            && matches!(r.trigger, Trigger::Created(t) if t == event.letter.letter_type)
    });
    created.or_else(|| {
        ROUTES
            .iter()
            .find(|r| matches!(r.trigger, Trigger::Status(s) if s == event.new_status))
    })
}

fn render(template: &str, letter: &Letter) -> String {
    template
        .replace("{sender}", &letter.sender)
        .replace("{number}", letter.reference())
}

async fn creator_role(users: &dyn UserDirectory, letter: &Letter) -> Role {
    match users.get_user(letter.created_by).await {
        Ok(Some(user)) => user.role,
        Ok(None) => Role::staff_for(letter.scope),
        Err(e) => {
            warn!(
                letter_id = letter.id,
                error = %e,
                "Creator lookup failed; using scope staff role"
            );
            Role::staff_for(letter.scope)
        }
    }
}

async fn verifier_roles(users: &dyn UserDirectory, letter: &Letter) -> Vec<Role> {
    if let Some(verifier) = letter.assigned_verifier {
        match users.get_user(verifier).await {
            Ok(Some(user)) => return vec![user.role],
            Ok(None) => {}
            Err(e) => {
                warn!(
                    letter_id = letter.id,
                    error = %e,
                    "Verifier lookup failed; using scope managers"
                )
            }
        }
    }
    Role::verifiers_for(letter.scope).to_vec()
}

/// Resolve the notifications an event produces, one per distinct role.
pub async fn resolve(event: &LetterEvent, users: &dyn UserDirectory) -> Vec<Notification> {
    let Some(route) = find_route(event) else {
        return Vec::new();
    };
    let letter = &event.letter;

    let mut roles: Vec<Role> = Vec::new();
    for recipients in route.recipients {
        let resolved = match recipients {
            Recipients::Role(role) => vec![*role],
            Recipients::Verifier => verifier_roles(users, letter).await,
            Recipients::Creator => vec![creator_role(users, letter).await],
            Recipients::ArchivistForOutbound if !letter.is_inbound() => vec![Role::ARCHIVIST],
            Recipients::ArchivistForOutbound => Vec::new(),
        };
        for role in resolved {
            if !roles.contains(&role) {
                roles.push(role);
            }
        }
    }

    let data = BTreeMap::from([
        ("letter_id".to_string(), letter.id.to_string()),
        ("status".to_string(), event.new_status.to_string()),
        ("type".to_string(), letter.letter_type.to_string()),
        ("event_id".to_string(), event.id.to_string()),
    ]);
    let body = render(route.body, letter);

    roles
        .into_iter()
        .map(|role| Notification {
            topic: Notification::topic_for(role),
            role,
            title: route.title.to_string(),
            body: body.clone(),
            data: data.clone(),
        })
        .collect()
}

#[derive(Debug, Clone, Copy)]
pub struct RouterOptions {
    pub send_timeout: Duration,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }
}

/// Handle to a running router.
pub struct RouterHandle {
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl RouterHandle {
    /// Stop accepting events, deliver what is queued, and wait for in-flight sends.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.task.await {
            warn!(error = %e, "Notification router task failed");
        }
    }
}

pub struct NotificationRouter {
    rx: mpsc::Receiver<LetterEvent>,
    sink: Arc<dyn NotificationSink>,
    users: Arc<dyn UserDirectory>,
    options: RouterOptions,
    in_flight: JoinSet<()>,
}

impl NotificationRouter {
    /// Spawn the dispatch loop.
    ///
    /// Dropping the returned handle also stops the loop after draining.
    pub fn start(
        rx: mpsc::Receiver<LetterEvent>,
        sink: Arc<dyn NotificationSink>,
        users: Arc<dyn UserDirectory>,
        options: RouterOptions,
    ) -> RouterHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let router = Self {
            rx,
            sink,
            users,
            options,
            in_flight: JoinSet::new(),
        };
        let task = tokio::spawn(router.run(shutdown_rx));
        RouterHandle { shutdown_tx, task }
    }

    async fn run(mut self, mut shutdown_rx: oneshot::Receiver<()>) {
        info!(sink = self.sink.name(), "Notification router started");
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    self.rx.close();
                    break;
                }
                event = self.rx.recv() => match event {
                    Some(event) => self.dispatch(event).await,
                    None => break,
                },
            }
            self.reap();
        }

        while let Some(event) = self.rx.recv().await {
            self.dispatch(event).await;
        }
        while let Some(result) = self.in_flight.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "Notification task panicked");
            }
        }
        info!("Notification router stopped");
    }

    fn reap(&mut self) {
        while let Some(result) = self.in_flight.try_join_next() {
            if let Err(e) = result {
                warn!(error = %e, "Notification task panicked");
            }
        }
    }

    async fn dispatch(&mut self, event: LetterEvent) {
        let notifications = resolve(&event, self.users.as_ref()).await;
        debug!(
            event_id = %event.id,
            letter_id = event.letter.id,
            status = %event.new_status,
            targets = notifications.len(),
            "Routing letter event"
        );

        for notification in notifications {
            let sink = Arc::clone(&self.sink);
            let timeout = self.options.send_timeout;
            self.in_flight.spawn(async move {
                match tokio::time::timeout(timeout, sink.send(&notification)).await {
                    Ok(Ok(())) => {
                        debug!(topic = %notification.topic, "Notification delivered");
                    }
                    Ok(Err(e)) => {
                        warn!(
                            topic = %notification.topic,
                            sink = sink.name(),
                            error = %e,
                            "Notification delivery failed"
                        );
                    }
                    Err(_) => {
                        let e = NotifyError::Timeout {
                            topic: notification.topic.clone(),
                            timeout,
                        };
                        warn!(sink = sink.name(), error = %e, "Notification delivery failed");
                    }
                }
            });
        }
    }
}
