use std::sync::Arc;

use chrono::Utc;
use log::{debug, warn};
use tokio::sync::{watch, Mutex};
use tokio::time::{self, Duration, MissedTickBehavior};
use uuid::Uuid;

use crate::api::{ApiError, Comment, Post, SocmediaClient};
use crate::notify::{Notification, NotificationLog};
use crate::session::Session;

/// Reactions the hosted app knows about.
pub const EMOJI_PALETTE: [&str; 6] = ["👍", "❤️", "😂", "😮", "😢", "😡"];

/// One retry after this pause when a mutation fails on transport.
const RETRY_DELAY: Duration = Duration::from_millis(750);

#[derive(Debug, Clone)]
pub enum Mutation {
    AddComment { post_id: String, comment: Comment },
    SetReaction {
        post_id: String,
        emoji: String,
        user_id: String,
    },
}

#[derive(Debug, Clone)]
struct Pending {
    seq: u64,
    mutation: Mutation,
}

/// In-memory mirror of the remote post collection.
///
/// `base` is the server-authoritative copy, wholesale replaced on every
/// refresh. Optimistic mutations live in a pending log and are replayed on
/// top of whatever base is current, so a refresh landing mid-mutation cannot
/// discard a local change that the server has not confirmed yet. A confirmed
/// entry is folded into base; a failed one is dropped, reverting exactly its
/// own effect.
#[derive(Debug, Default)]
pub struct FeedState {
    base: Vec<Post>,
    pending: Vec<Pending>,
    next_seq: u64,
}

impl FeedState {
    pub fn view(&self) -> Vec<Post> {
        let mut posts = self.base.clone();
        for entry in &self.pending {
            apply(&mut posts, &entry.mutation);
        }
        posts
    }

    pub fn reconcile(&mut self, server: Vec<Post>) {
        self.base = server;
    }

    pub fn push(&mut self, mutation: Mutation) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.push(Pending { seq, mutation });
        seq
    }

    pub fn confirm(&mut self, seq: u64) {
        if let Some(i) = self.pending.iter().position(|p| p.seq == seq) {
            let entry = self.pending.remove(i);
            apply(&mut self.base, &entry.mutation);
        }
    }

    pub fn revert(&mut self, seq: u64) {
        self.pending.retain(|p| p.seq != seq);
    }

    /// Case-insensitive substring filter on content and author username.
    /// A blank term is no filter at all.
    pub fn search(&self, term: &str) -> Vec<Post> {
        let posts = self.view();
        let term = term.trim().to_lowercase();
        if term.is_empty() {
            return posts;
        }
        posts
            .into_iter()
            .filter(|p| {
                p.content.to_lowercase().contains(&term)
                    || p.username.to_lowercase().contains(&term)
            })
            .collect()
    }

    fn base(&self) -> &[Post] {
        &self.base
    }
}

/// Mutations on a post the mirror no longer holds are dropped silently.
fn apply(posts: &mut [Post], mutation: &Mutation) {
    match mutation {
        Mutation::AddComment { post_id, comment } => {
            if let Some(post) = posts.iter_mut().find(|p| p.id == *post_id) {
                post.comments.push(comment.clone());
            }
        }
        Mutation::SetReaction {
            post_id,
            emoji,
            user_id,
        } => {
            if let Some(post) = posts.iter_mut().find(|p| p.id == *post_id) {
                // One active reaction per user: leaving every other set,
                // including the previous emoji's, before joining the new one.
                for users in post.reactions.values_mut() {
                    users.retain(|u| u != user_id);
                }
                let users = post.reactions.entry(emoji.clone()).or_default();
                if !users.contains(user_id) {
                    users.push(user_id.clone());
                }
            }
        }
    }
}

fn activity_messages(prev: &[Post], fresh: &[Post], username: &str) -> Vec<String> {
    let mut out = Vec::new();
    for post in fresh.iter().filter(|p| p.username == username) {
        let Some(old) = prev.iter().find(|p| p.id == post.id) else {
            continue;
        };
        let reactions: usize = post.reactions.values().map(Vec::len).sum();
        let old_reactions: usize = old.reactions.values().map(Vec::len).sum();
        if post.comments.len() > old.comments.len() || reactions > old_reactions {
            out.push(format!(
                "New activity on your post \"{}\"",
                excerpt(&post.content)
            ));
        }
    }
    out
}

fn excerpt(content: &str) -> String {
    let short: String = content.chars().take(40).collect();
    if short.len() < content.len() {
        format!("{short}…")
    } else {
        short
    }
}

pub struct FeedSynchronizer {
    api: SocmediaClient,
    session: Option<Session>,
    state: FeedState,
    notices: NotificationLog,
    synced_once: bool,
}

impl FeedSynchronizer {
    pub fn new(api: SocmediaClient, session: Option<Session>) -> Self {
        Self {
            api,
            session,
            state: FeedState::default(),
            notices: NotificationLog::default(),
            synced_once: false,
        }
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn posts(&self) -> Vec<Post> {
        self.state.view()
    }

    pub fn search(&self, term: &str) -> Vec<Post> {
        self.state.search(term)
    }

    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        self.notices.drain()
    }

    /// Prime the mirror with an already-fetched collection.
    pub fn seed(&mut self, posts: Vec<Post>) {
        self.state.reconcile(posts);
        self.synced_once = true;
    }

    /// Replace the mirror with the server's collection. On failure the
    /// previous view is kept and the error logged; the next tick tries again.
    pub async fn refresh(&mut self) -> Result<(), ApiError> {
        let Some(session) = &self.session else {
            return Err(ApiError::Unauthorized);
        };
        let token = session.token.clone();
        let username = session.user.username.clone();

        match self.api.posts(&token).await {
            Ok(fresh) => {
                if self.synced_once {
                    for msg in activity_messages(self.state.base(), &fresh, &username) {
                        self.notices.push(msg);
                    }
                }
                self.state.reconcile(fresh);
                self.synced_once = true;
                Ok(())
            }
            Err(ApiError::Unauthorized) => {
                self.session = None;
                Err(ApiError::Unauthorized)
            }
            Err(e) => {
                warn!("feed refresh failed, keeping the previous view: {e}");
                Err(e)
            }
        }
    }

    /// Publish a post. Not optimistic: the mirror picks the post up from the
    /// refresh that follows the server's acknowledgement.
    pub async fn create_post(
        &mut self,
        content: &str,
        image: Option<String>,
    ) -> Result<Post, ApiError> {
        let Some(session) = &self.session else {
            return Err(ApiError::Unauthorized);
        };
        if content.trim().is_empty() && image.is_none() {
            return Err(ApiError::Validation("a post needs text or an image"));
        }
        let token = session.token.clone();

        let created = {
            let mut req = self.api.create_post(&token, content);
            if let Some(image) = image {
                req = req.image(image);
            }
            match req.send().await {
                Err(ApiError::Http(e)) => {
                    warn!("publishing post failed ({e}), retrying once");
                    time::sleep(RETRY_DELAY).await;
                    req.send().await
                }
                other => other,
            }
        };
        let created = match created {
            Ok(post) => post,
            Err(ApiError::Unauthorized) => {
                self.session = None;
                return Err(ApiError::Unauthorized);
            }
            Err(e) => return Err(e),
        };

        self.notices
            .push("Your post was published successfully!".to_owned());
        if let Err(e) = self.refresh().await {
            debug!("refresh after publishing failed: {e}");
        }
        Ok(created)
    }

    /// Optimistically append a locally-built comment, then tell the server.
    /// The local echo is confirmed or reverted by the server's answer.
    pub async fn add_comment(&mut self, post_id: &str, text: &str) -> Result<(), ApiError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ApiError::Validation("comment text is empty"));
        }
        let Some(session) = &self.session else {
            return Err(ApiError::Unauthorized);
        };
        let token = session.token.clone();
        let username = session.user.username.clone();

        let seq = self.state.push(Mutation::AddComment {
            post_id: post_id.to_owned(),
            comment: Comment {
                id: Uuid::new_v4().to_string(),
                username: username.clone(),
                content: text.to_owned(),
                created_at: Some(Utc::now()),
            },
        });

        let res = match self.api.add_comment(&token, post_id, text, &username).await {
            Err(ApiError::Http(e)) => {
                warn!("sending comment failed ({e}), retrying once");
                time::sleep(RETRY_DELAY).await;
                self.api.add_comment(&token, post_id, text, &username).await
            }
            other => other,
        };
        match res {
            Ok(_) => {
                self.state.confirm(seq);
                if let Err(e) = self.refresh().await {
                    debug!("refresh after commenting failed: {e}");
                }
                Ok(())
            }
            Err(e) => {
                self.state.revert(seq);
                if matches!(e, ApiError::Unauthorized) {
                    self.session = None;
                }
                Err(e)
            }
        }
    }

    /// Switch the user's reaction on a post. Exclusive: joining one emoji's
    /// set leaves any other. The server receives the recomputed map.
    pub async fn set_reaction(&mut self, post_id: &str, emoji: &str) -> Result<(), ApiError> {
        let Some(session) = &self.session else {
            return Err(ApiError::Unauthorized);
        };
        let token = session.token.clone();
        let user_id = session.user.id.clone();

        let seq = self.state.push(Mutation::SetReaction {
            post_id: post_id.to_owned(),
            emoji: emoji.to_owned(),
            user_id,
        });
        let Some(reactions) = self
            .state
            .view()
            .into_iter()
            .find(|p| p.id == post_id)
            .map(|p| p.reactions)
        else {
            self.state.revert(seq);
            return Err(ApiError::Validation("no such post in the local feed"));
        };

        let res = match self.api.set_reactions(&token, post_id, &reactions).await {
            Err(ApiError::Http(e)) => {
                warn!("sending reaction failed ({e}), retrying once");
                time::sleep(RETRY_DELAY).await;
                self.api.set_reactions(&token, post_id, &reactions).await
            }
            other => other,
        };
        match res {
            Ok(_) => {
                self.state.confirm(seq);
                if let Err(e) = self.refresh().await {
                    debug!("refresh after reacting failed: {e}");
                }
                Ok(())
            }
            Err(e) => {
                self.state.revert(seq);
                if matches!(e, ApiError::Unauthorized) {
                    self.session = None;
                }
                Err(e)
            }
        }
    }
}

/// Periodic refresh bound to a view's lifetime. `stop` shuts the task down
/// and waits for it to exit; nothing keeps ticking past teardown.
pub struct RefreshTask {
    stop: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

impl RefreshTask {
    pub fn spawn(sync: Arc<Mutex<FeedSynchronizer>>, period: Duration) -> Self {
        let (stop, mut stopped) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut tick = time::interval(period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let mut sync = sync.lock().await;
                        if let Err(e) = sync.refresh().await {
                            debug!("periodic refresh: {e}");
                        }
                    }
                    _ = stopped.changed() => break,
                }
            }
        });
        Self { stop, handle }
    }

    pub async fn stop(self) {
        let _ = self.stop.send(true);
        let _ = self.handle.await;
    }
}
