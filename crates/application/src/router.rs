use std::sync::Arc;

use domain::{ConnectionId, ConversationId, RepositoryError};
use tracing::{debug, error, warn};

use crate::broadcaster::LocalMessageBroadcaster;
use crate::events::{AckStatus, ClientEvent, FrameError, ServerEvent, JOIN_CONVERSATION};
use crate::participants::ParticipantSynchronizer;
use crate::repository::ConversationRepository;
use crate::rooms::{Channel, RoomRegistry};
use crate::session::Session;

/// 事件处理的结果，由路由器统一投递
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// 只回给发起连接
    Reply(ServerEvent),
    Broadcast {
        channel: Channel,
        event: ServerEvent,
        exclude: Option<ConnectionId>,
    },
}

/// 客户端事件分发
///
/// 同一连接的事件由连接任务按到达顺序依次调用 `dispatch`，不同连接之间并发执行。
pub struct EventRouter {
    rooms: Arc<RoomRegistry>,
    broadcaster: Arc<LocalMessageBroadcaster>,
    conversations: Arc<dyn ConversationRepository>,
    synchronizer: ParticipantSynchronizer,
}

impl EventRouter {
    pub fn new(
        broadcaster: Arc<LocalMessageBroadcaster>,
        conversations: Arc<dyn ConversationRepository>,
        synchronizer: ParticipantSynchronizer,
    ) -> Self {
        Self {
            rooms: broadcaster.rooms().clone(),
            broadcaster,
            conversations,
            synchronizer,
        }
    }

    /// 解析一帧文本并处理
    pub async fn dispatch(&self, session: &Session, text: &str) {
        let outcomes = match ClientEvent::parse(text) {
            Ok(event) => self.handle(session, event).await,
            Err(err) => vec![Outcome::Reply(rejection(err))],
        };
        self.apply(session.connection_id, outcomes).await;
    }

    pub async fn handle(&self, session: &Session, event: ClientEvent) -> Vec<Outcome> {
        match event {
            ClientEvent::JoinConversation(conversation_id) => {
                self.join(session, conversation_id).await
            }
            ClientEvent::LeaveConversation(conversation_id) => {
                self.leave(session, conversation_id).await
            }
            ClientEvent::Typing {
                conversation_id,
                is_typing,
            } => self.typing(session, conversation_id, is_typing).await,
        }
    }

    pub async fn apply(&self, connection_id: ConnectionId, outcomes: Vec<Outcome>) {
        for outcome in outcomes {
            match outcome {
                Outcome::Reply(event) => {
                    self.broadcaster
                        .send_to_connection(connection_id, &event)
                        .await;
                }
                Outcome::Broadcast {
                    channel,
                    event,
                    exclude,
                } => {
                    self.broadcaster.broadcast(&channel, &event, exclude).await;
                }
            }
        }
    }

    async fn join(&self, session: &Session, conversation_id: ConversationId) -> Vec<Outcome> {
        let connection_id = session.connection_id;

        // 先确认会话存在，不存在的会话不会产生房间成员
        let participants = match self.conversations.participants(&conversation_id).await {
            Ok(participants) => participants,
            Err(RepositoryError::NotFound) => {
                debug!(%connection_id, %conversation_id, "加入失败：会话不存在");
                return vec![join_failed(&conversation_id, "Conversation not found.")];
            }
            Err(err) => {
                error!(%connection_id, %conversation_id, error = %err, "读取会话参与者失败");
                return vec![join_failed(&conversation_id, "Failed to join conversation.")];
            }
        };

        let channel = Channel::Conversation(conversation_id.clone());
        let first_time = self.rooms.join(channel.clone(), connection_id).await;

        let mut outcomes = vec![Outcome::Reply(ServerEvent::JoinedConversation {
            conversation_id: conversation_id.clone(),
            status: AckStatus::Success,
        })];

        let is_participant = participants
            .iter()
            .any(|p| &p.user_id == session.user_id());
        if first_time && !is_participant {
            match self
                .synchronizer
                .ensure_participant(&conversation_id, &session.user)
                .await
            {
                Ok(sync) => {
                    outcomes.extend(sync.room_events(&conversation_id).into_iter().map(|event| {
                        Outcome::Broadcast {
                            channel: channel.clone(),
                            event,
                            exclude: None,
                        }
                    }));
                }
                Err(err) => {
                    warn!(%connection_id, %conversation_id, error = %err, "参与者同步失败，撤销加入");
                    self.rooms.leave(&channel, connection_id).await;
                    return vec![join_failed(&conversation_id, "Failed to join conversation.")];
                }
            }
        }

        debug!(%connection_id, %conversation_id, first_time, "已加入会话房间");
        outcomes
    }

    async fn leave(&self, session: &Session, conversation_id: ConversationId) -> Vec<Outcome> {
        let channel = Channel::Conversation(conversation_id.clone());
        if !self.rooms.leave(&channel, session.connection_id).await {
            debug!(connection_id = %session.connection_id, %conversation_id, "未加入的房间，忽略离开请求");
            return Vec::new();
        }
        vec![Outcome::Reply(ServerEvent::LeftConversation {
            conversation_id,
            status: AckStatus::Success,
        })]
    }

    async fn typing(
        &self,
        session: &Session,
        conversation_id: ConversationId,
        is_typing: bool,
    ) -> Vec<Outcome> {
        let channel = Channel::Conversation(conversation_id.clone());
        if !self.rooms.is_member(&channel, session.connection_id).await {
            debug!(connection_id = %session.connection_id, %conversation_id, "未加入房间，丢弃输入状态");
            return Vec::new();
        }
        vec![Outcome::Broadcast {
            channel,
            event: ServerEvent::UserTyping {
                conversation_id,
                user_id: session.user_id().clone(),
                username: session.user.username.clone(),
                is_typing,
            },
            exclude: Some(session.connection_id),
        }]
    }
}

fn join_failed(conversation_id: &ConversationId, message: &str) -> Outcome {
    Outcome::Reply(ServerEvent::join_error(
        Some(conversation_id.to_string()),
        message,
    ))
}

fn rejection(err: FrameError) -> ServerEvent {
    match err {
        FrameError::InvalidPayload {
            event: JOIN_CONVERSATION,
            conversation_id,
            message,
        } => ServerEvent::join_error(conversation_id, message),
        FrameError::InvalidPayload { message, .. } => ServerEvent::error(message),
        FrameError::UnknownEvent(name) => ServerEvent::error(format!("Unknown event: {name}")),
        FrameError::Malformed(_) => ServerEvent::error("Malformed frame."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{conversation_id, Harness};
    use serde_json::json;

    fn join(id: &str) -> serde_json::Value {
        json!({"event": "joinConversation", "data": id})
    }

    #[tokio::test]
    async fn non_participant_join_adds_user_and_announces_once() {
        let harness = Harness::new().await;
        let mut alice = harness.connect("u1").await;

        harness.send(&alice, join("conv123")).await;
        let frames = alice.drain();
        let names: Vec<_> = frames.iter().map(|f| f["event"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["joinedConversation", "newMessage", "participantsUpdated"]);
        assert_eq!(frames[1]["data"]["type"], "system");
        assert_eq!(frames[1]["data"]["content"], "alice has joined the conversation.");
        let listed: Vec<_> = frames[2]["data"]["participants"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["userId"].as_str().unwrap())
            .collect();
        assert_eq!(listed, vec!["u2", "u1"]);

        // 第二次加入：只有确认帧，没有新的系统消息
        harness.send(&alice, join("conv123")).await;
        assert_eq!(alice.event_names(), vec!["joinedConversation"]);

        let id = conversation_id("conv123");
        let channel = Channel::Conversation(id.clone());
        assert_eq!(harness.rooms.members_of(&channel).await.len(), 1);
        assert_eq!(harness.store.message_count(&id).await, 1);
    }

    #[tokio::test]
    async fn second_connection_of_same_user_does_not_repeat_announcement() {
        let harness = Harness::new().await;
        let mut tab1 = harness.connect("u1").await;
        let mut tab2 = harness.connect("u1").await;

        harness.send(&tab1, join("conv123")).await;
        harness.send(&tab2, join("conv123")).await;

        assert_eq!(harness.store.message_count(&conversation_id("conv123")).await, 1);
        assert_eq!(tab2.event_names(), vec!["joinedConversation"]);
        assert_eq!(
            tab1.event_names(),
            vec!["joinedConversation", "newMessage", "participantsUpdated"]
        );
    }

    #[tokio::test]
    async fn participant_join_is_silent_for_the_room() {
        let harness = Harness::new().await;
        let mut bob = harness.connect("u2").await;

        harness.send(&bob, join("conv123")).await;
        assert_eq!(bob.event_names(), vec!["joinedConversation"]);
        assert_eq!(harness.store.message_count(&conversation_id("conv123")).await, 0);
    }

    #[tokio::test]
    async fn join_of_missing_conversation_reports_error_without_membership() {
        let harness = Harness::new().await;
        let mut alice = harness.connect("u1").await;

        harness
            .send(&alice, json!({"event": "joinConversation", "data": {"conversationId": "nope"}}))
            .await;
        let frames = alice.drain();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["event"], "joinConversationError");
        assert_eq!(frames[0]["data"]["conversationId"], "nope");
        assert!(harness
            .rooms
            .members_of(&Channel::Conversation(conversation_id("nope")))
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn join_with_invalid_id_reports_join_error() {
        let harness = Harness::new().await;
        let mut alice = harness.connect("u1").await;

        harness.send(&alice, json!({"event": "joinConversation", "data": ""})).await;
        let frames = alice.drain();
        assert_eq!(frames[0]["event"], "joinConversationError");
        assert_eq!(frames[0]["data"]["message"], "Invalid conversation ID.");
    }

    #[tokio::test]
    async fn leave_of_never_joined_room_is_silent() {
        let harness = Harness::new().await;
        let mut bob = harness.connect("u2").await;
        let mut carol = harness.connect("u3").await;

        harness
            .send(&bob, json!({"event": "leaveConversation", "data": "conv123"}))
            .await;
        assert!(bob.drain().is_empty());
        assert!(carol.drain().is_empty());
    }

    #[tokio::test]
    async fn leave_after_join_is_acknowledged() {
        let harness = Harness::new().await;
        let mut bob = harness.connect("u2").await;

        harness.send(&bob, join("conv123")).await;
        bob.drain();
        harness
            .send(&bob, json!({"event": "leaveConversation", "data": "conv123"}))
            .await;
        let frames = bob.drain();
        assert_eq!(frames[0]["event"], "leftConversation");
        assert_eq!(frames[0]["data"]["status"], "success");
    }

    #[tokio::test]
    async fn typing_reaches_others_but_never_the_sender() {
        let harness = Harness::new().await;
        let mut bob = harness.connect("u2").await;
        let mut bob_tab = harness.connect("u2").await;
        let mut alice = harness.connect("u1").await;
        harness.send(&bob, join("conv123")).await;
        harness.send(&bob_tab, join("conv123")).await;
        harness.send(&alice, join("conv123")).await;
        bob.drain();
        bob_tab.drain();
        alice.drain();

        harness
            .send(
                &bob,
                json!({"event": "typing", "data": {"conversationId": "conv123", "isTyping": true}}),
            )
            .await;

        assert!(bob.drain().is_empty());
        let tab_frames = bob_tab.drain();
        assert_eq!(tab_frames[0]["event"], "userTyping");
        let frames = alice.drain();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["data"]["userId"], "u2");
        assert_eq!(frames[0]["data"]["username"], "bob");
        assert_eq!(frames[0]["data"]["isTyping"], true);
    }

    #[tokio::test]
    async fn typing_outside_room_is_dropped() {
        let harness = Harness::new().await;
        let mut bob = harness.connect("u2").await;
        let alice = harness.connect("u1").await;
        harness.send(&bob, join("conv123")).await;
        bob.drain();

        harness
            .send(
                &alice,
                json!({"event": "typing", "data": {"conversationId": "conv123", "isTyping": true}}),
            )
            .await;
        assert!(bob.drain().is_empty());
    }

    #[tokio::test]
    async fn unknown_event_keeps_connection_usable() {
        let harness = Harness::new().await;
        let mut bob = harness.connect("u2").await;

        harness.send(&bob, json!({"event": "dance", "data": {}})).await;
        harness
            .router
            .dispatch(&bob.session, "{not json")
            .await;
        harness.send(&bob, join("conv123")).await;

        let frames = bob.drain();
        let names: Vec<_> = frames.iter().map(|f| f["event"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["error", "error", "joinedConversation"]);
        assert_eq!(frames[0]["data"]["message"], "Unknown event: dance");
    }

    #[tokio::test]
    async fn disconnect_removes_connection_from_joined_rooms() {
        let harness = Harness::new().await;
        let bob = harness.connect("u2").await;
        harness.send(&bob, join("conv123")).await;
        let channel = Channel::Conversation(conversation_id("conv123"));
        assert!(harness.rooms.is_member(&channel, bob.session.connection_id).await);

        harness.gateway.disconnect(bob.session.connection_id).await;
        assert!(!harness
            .rooms
            .members_of(&channel)
            .await
            .contains(&bob.session.connection_id));
    }

    #[tokio::test]
    async fn failed_participant_sync_rolls_back_room_join() {
        use crate::repository::{MockConversationRepository, MockMessageRepository};
        use domain::{RepositoryError, UserSummary};

        let harness = Harness::new().await;
        let mut conversations = MockConversationRepository::new();
        conversations
            .expect_participants()
            .returning(|_| Ok(Vec::<UserSummary>::new()));
        conversations
            .expect_add_participant_if_absent()
            .returning(|_, _| Err(RepositoryError::storage("connection reset")));
        let conversations: Arc<dyn ConversationRepository> = Arc::new(conversations);
        let router = EventRouter::new(
            harness.broadcaster.clone(),
            conversations.clone(),
            ParticipantSynchronizer::new(conversations, Arc::new(MockMessageRepository::new())),
        );
        let mut alice = harness.connect("u1").await;

        let outcomes = router
            .handle(
                &alice.session,
                ClientEvent::JoinConversation(conversation_id("conv123")),
            )
            .await;
        router.apply(alice.session.connection_id, outcomes).await;

        let frames = alice.drain();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["event"], "joinConversationError");
        assert!(!harness
            .rooms
            .is_member(
                &Channel::Conversation(conversation_id("conv123")),
                alice.session.connection_id
            )
            .await);
    }
}
