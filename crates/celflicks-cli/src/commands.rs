use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{info, warn};

use celflicks_common::{new_id, CelflicksError, Result};
use celflicks_config::CelflicksConfig;
use celflicks_rooms::membership::{rebuild_participants, ChannelEvent, PresenceService};
use celflicks_rooms::protocol::{room_topic, NewRoom};
use celflicks_rooms::{
    Participant, RealtimeConfig, RealtimeHub, Room, RoomDirectory, RoomStore, SupabaseStore,
};

fn open_store(config: &CelflicksConfig, access_token: Option<&str>) -> Result<Arc<SupabaseStore>> {
    let store = SupabaseStore::new(&config.supabase, config.tables.clone(), access_token)?;
    Ok(Arc::new(store))
}

fn open_hub(config: &CelflicksConfig) -> RealtimeHub {
    RealtimeHub::connect(
        RealtimeConfig::from_settings(&config.supabase, &config.realtime),
        Duration::from_secs(u64::from(config.realtime.subscribe_timeout_secs)),
    )
}

fn format_room(room: &Room) -> String {
    format!(
        "{}  {}  ({})",
        room.created_at.format("%Y-%m-%d %H:%M"),
        room.title,
        room.id
    )
}

fn format_participant(participant: &Participant) -> String {
    if participant.is_muted {
        format!("{} (muted)", participant.display_name)
    } else {
        participant.display_name.clone()
    }
}

fn print_rooms(rooms: &[Room]) {
    if rooms.is_empty() {
        println!("no rooms");
    }
    for room in rooms {
        println!("{}", format_room(room));
    }
}

pub async fn list(config: &CelflicksConfig) -> Result<()> {
    let store = open_store(config, config.supabase.access_token.as_deref())?;
    print_rooms(&store.list_rooms().await?);
    Ok(())
}

pub async fn watch(config: &CelflicksConfig) -> Result<()> {
    let store = open_store(config, config.supabase.access_token.as_deref())?;
    let hub = open_hub(config);
    let directory = RoomDirectory::new(store, config.tables.rooms.clone());
    directory.start(&hub).await;

    let mut rooms = directory.subscribe();
    print_rooms(&rooms.borrow_and_update());
    loop {
        tokio::select! {
            changed = rooms.changed() => {
                if changed.is_err() {
                    break;
                }
                println!("--");
                print_rooms(&rooms.borrow_and_update());
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    directory.stop().await;
    hub.disconnect().await;
    Ok(())
}

pub async fn create(config: &CelflicksConfig, title: &str, user_id: &str) -> Result<()> {
    let token = config.supabase.access_token.as_deref().ok_or_else(|| {
        CelflicksError::Rooms("creating a room needs SUPABASE_ACCESS_TOKEN".into())
    })?;
    let store = open_store(config, Some(token))?;
    let room = store
        .insert_room(&NewRoom {
            title: title.to_string(),
            host_id: user_id.to_string(),
        })
        .await?;
    info!(room_id = %room.id, "Room created");
    println!("{}", format_room(&room));
    Ok(())
}

/// Observe a room's presence without announcing ourselves.
pub async fn who(config: &CelflicksConfig, room_id: &str) -> Result<()> {
    let hub = open_hub(config);
    let (tx, mut rx) = mpsc::channel(64);
    let observer_key = format!("observer-{}", new_id());
    let channel = hub.subscribe(&room_topic(room_id), &observer_key, tx).await?;

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(ChannelEvent::Sync(state)) => {
                    let participants = rebuild_participants(&state, None, false);
                    let names: Vec<String> = participants.iter().map(format_participant).collect();
                    println!("{} present: {}", names.len(), names.join(", "));
                }
                Some(ChannelEvent::Error(message)) => warn!(room_id, error = %message, "Presence channel error"),
                Some(_) => {}
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    channel.unsubscribe().await;
    hub.disconnect().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use celflicks_common::PeerId;

    fn participant(name: &str, is_muted: bool) -> Participant {
        Participant {
            user_id: format!("u-{name}"),
            peer_id: PeerId::from(format!("p-{name}")),
            display_name: name.into(),
            avatar_url: None,
            is_muted,
            is_speaking: false,
        }
    }

    #[test]
    fn muted_participants_are_marked() {
        assert_eq!(format_participant(&participant("ann", true)), "ann (muted)");
        assert_eq!(format_participant(&participant("bob", false)), "bob");
    }

    #[test]
    fn room_line_has_title_and_id() {
        let room: Room = serde_json::from_value(serde_json::json!({
            "id": "r-1",
            "title": "Design Jam",
            "host_id": "u-1",
            "created_at": "2024-05-01T12:30:00Z"
        }))
        .unwrap();
        assert_eq!(format_room(&room), "2024-05-01 12:30  Design Jam  (r-1)");
    }
}
