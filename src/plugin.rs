use crate::prelude::*;
use bevy::{log, prelude::*};

/// Adds a [`NavigationManager`] resource and resolves [`PathRequest`] components.
///
/// If a `NavigationManager` is already present it is kept, which allows setting
/// up chunks before the plugin is added.
#[derive(Default)]
pub struct JumpNavPlugin {
    pub settings: NavSettings,
}

impl Plugin for JumpNavPlugin {
    fn build(&self, app: &mut App) {
        if !app.world().contains_resource::<NavigationManager>() {
            app.insert_resource(NavigationManager::new(self.settings));
        }

        app.add_systems(
            Update,
            (request_paths, collect_paths).chain().in_set(PathingSet),
        );
    }
}

#[derive(SystemSet, Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathingSet;

/// Insert on an entity to ask for a path. World XZ, `y` holds world Z.
///
/// Replaced by [`PendingPath`] once submitted, and later by a [`Path`] or [`PathFailed`].
#[derive(Component, Debug, Clone, Copy)]
pub struct PathRequest {
    pub start: Vec2,
    pub goal: Vec2,
    pub options: PathOptions,
}

#[derive(Component, Debug)]
pub struct PendingPath(pub PathTicket);

/// No path could be found for the last request.
#[derive(Component, Debug, Clone, Copy, Default)]
pub struct PathFailed;

fn request_paths(
    mut commands: Commands,
    mut manager: ResMut<NavigationManager>,
    query: Query<(Entity, &PathRequest)>,
) {
    for (entity, request) in &query {
        let ticket = manager.find_path(request.start, request.goal, request.options);
        log::debug!("Entity {:?} requested path {}", entity, ticket.id());

        commands
            .entity(entity)
            .remove::<(PathRequest, Path, PathFailed)>()
            .insert(PendingPath(ticket));
    }
}

fn collect_paths(mut commands: Commands, query: Query<(Entity, &PendingPath)>) {
    for (entity, pending) in &query {
        match pending.0.poll() {
            PathPoll::Pending => {}
            PathPoll::Ready(Some(path)) => {
                commands.entity(entity).remove::<PendingPath>().insert(path);
            }
            PathPoll::Ready(None) => {
                log::debug!("No path for entity {:?}", entity);
                commands
                    .entity(entity)
                    .remove::<PendingPath>()
                    .insert(PathFailed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn settings() -> NavSettings {
        NavSettingsBuilder::new(16, 1.0).pool_size(1).build()
    }

    fn request(goal: Vec2) -> PathRequest {
        PathRequest {
            start: Vec2::ZERO,
            goal,
            options: PathOptions::default(),
        }
    }

    #[test]
    fn test_requests_resolve_synchronously() {
        let mut manager = NavigationManager::synchronous(settings());
        manager.add_chunk(0, 0, None).unwrap();

        let mut app = App::new();
        app.insert_resource(manager).add_plugins(JumpNavPlugin {
            settings: settings(),
        });

        let found = app.world_mut().spawn(request(Vec2::new(9.0, 9.0))).id();
        let failed = app.world_mut().spawn(request(Vec2::new(500.0, 500.0))).id();
        app.update();

        let world = app.world();
        assert_eq!(world.get::<Path>(found).map(Path::len), Some(2));
        assert!(world.get::<PendingPath>(found).is_none());
        assert!(world.get::<PathRequest>(found).is_none());
        assert!(world.get::<PathFailed>(failed).is_some());
        assert!(world.get::<Path>(failed).is_none());
    }

    #[test]
    fn test_requests_resolve_on_worker_pool() {
        let mut app = App::new();
        app.add_plugins(JumpNavPlugin {
            settings: settings(),
        });
        app.world_mut()
            .resource_mut::<NavigationManager>()
            .add_chunk(0, 0, None)
            .unwrap();

        let entity = app.world_mut().spawn(request(Vec2::new(12.0, 3.0))).id();

        let mut resolved = false;
        for _ in 0..500 {
            app.update();
            if app.world().get::<Path>(entity).is_some() {
                resolved = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(resolved);
        assert!(app.world().get::<PathFailed>(entity).is_none());
    }
}
