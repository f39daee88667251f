//! RESTful resources wired from controller capabilities.
//!
//! A [`Controller`] opts into actions by returning `Some` from the matching
//! method. [`Group::resource`] asks once, at registration, and routes only
//! what the controller offers:
//!
//! | Capability | Method | Path |
//! |---|---|---|
//! | `index` | GET | `/{name}` |
//! | `create` | POST | `/{name}` |
//! | `explore` | HEAD | `/{name}/{id}` |
//! | `show` | GET | `/{name}/{id}` |
//! | `update` | PUT | `/{name}/{id}` |
//! | `destroy` | DELETE | `/{name}/{id}` |
//!
//! A controller offering `dispatch` takes every standard method on both
//! paths instead, and the per-verb capabilities are ignored.

use std::sync::Arc;

use http::Method;

use crate::handler::BoxedMiddleware;
use crate::router::{Group, STANDARD_METHODS};

/// A resource action: the last entry of the route's chain.
pub type Action = BoxedMiddleware;

pub trait Controller {
    /// Name of the member path parameter. Defaults to the last segment of
    /// the resource name.
    fn id(&self) -> Option<String> {
        None
    }

    fn index(&self) -> Option<Action> {
        None
    }

    fn create(&self) -> Option<Action> {
        None
    }

    /// `HEAD` on a member.
    fn explore(&self) -> Option<Action> {
        None
    }

    fn show(&self) -> Option<Action> {
        None
    }

    fn update(&self) -> Option<Action> {
        None
    }

    fn destroy(&self) -> Option<Action> {
        None
    }

    /// One action for every method on both paths.
    fn dispatch(&self) -> Option<Action> {
        None
    }
}

impl Group {
    /// Registers the routes `controller` supports under `name` and returns
    /// the member group (`{name}/{id}`) for nesting sub-resources.
    pub fn resource(&self, name: &str, controller: &impl Controller) -> Group {
        let id = controller.id().unwrap_or_else(|| default_id(name));
        let id = id.trim_start_matches(':').trim_start_matches('{').trim_end_matches('}');
        let collection = name.trim_end_matches('/');
        let member = format!("{collection}/{{{id}}}");

        if let Some(action) = controller.dispatch() {
            for method in STANDARD_METHODS {
                self.handle_boxed(method.clone(), collection, Arc::clone(&action));
                self.handle_boxed(method, &member, Arc::clone(&action));
            }
            return self.group(&member, []);
        }

        let wiring = [
            (Method::GET, collection, controller.index()),
            (Method::POST, collection, controller.create()),
            (Method::HEAD, member.as_str(), controller.explore()),
            (Method::GET, member.as_str(), controller.show()),
            (Method::PUT, member.as_str(), controller.update()),
            (Method::DELETE, member.as_str(), controller.destroy()),
        ];
        for (method, path, action) in wiring {
            if let Some(action) = action {
                self.handle_boxed(method, path, action);
            }
        }

        self.group(&member, [])
    }
}

fn default_id(name: &str) -> String {
    name.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_owned()
}

#[cfg(test)]
mod tests {
    use parking_lot::RwLock;

    use super::*;
    use crate::context::Context;
    use crate::handler::{boxed, BoxFuture};
    use crate::router::RouteTable;

    fn show_user(ctx: &mut Context) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let id = ctx.param("user").unwrap_or_default().to_owned();
            ctx.text(id);
        })
    }

    fn noop(ctx: &mut Context) -> BoxFuture<'_, ()> {
        Box::pin(async move { ctx.finish() })
    }

    struct Users;

    impl Controller for Users {
        fn index(&self) -> Option<Action> {
            Some(boxed(noop))
        }

        fn show(&self) -> Option<Action> {
            Some(boxed(show_user))
        }
    }

    struct Posts;

    impl Controller for Posts {
        fn id(&self) -> Option<String> {
            Some(":post_id".to_owned())
        }

        fn create(&self) -> Option<Action> {
            Some(boxed(noop))
        }

        fn explore(&self) -> Option<Action> {
            Some(boxed(noop))
        }
    }

    struct Everything;

    impl Controller for Everything {
        fn dispatch(&self) -> Option<Action> {
            Some(boxed(noop))
        }

        fn show(&self) -> Option<Action> {
            unreachable!("dispatch takes precedence")
        }
    }

    fn table() -> (Group, Arc<RwLock<RouteTable>>) {
        let table = Arc::new(RwLock::new(RouteTable::default()));
        (Group::root(Arc::clone(&table)), table)
    }

    fn routes(table: &RwLock<RouteTable>) -> Vec<String> {
        table.read().routes().iter().map(|r| format!("{} {}", r.method, r.path)).collect()
    }

    #[test]
    fn wires_only_offered_capabilities() {
        let (root, table) = table();
        let member = root.group("/api", []).resource("users", &Users);

        assert_eq!(routes(&table), vec!["GET /api/users", "GET /api/users/{users}"]);
        assert_eq!(member.prefix(), "/api/users/{users}");
    }

    #[test]
    fn id_override_and_nesting() {
        let (root, table) = table();
        struct Members;
        impl Controller for Members {
            fn id(&self) -> Option<String> {
                Some("user".to_owned())
            }
            fn show(&self) -> Option<Action> {
                Some(boxed(show_user))
            }
        }

        let user = root.resource("/users", &Members);
        user.resource("posts", &Posts);

        assert_eq!(
            routes(&table),
            vec![
                "GET /users/{user}",
                "POST /users/{user}/posts",
                "HEAD /users/{user}/posts/{post_id}",
            ]
        );
        let guard = table.read();
        let (_, params) = guard.lookup(&Method::HEAD, "/users/7/posts/9").unwrap();
        assert_eq!(params.get("user"), Some("7"));
        assert_eq!(params.get("post_id"), Some("9"));
    }

    #[test]
    fn dispatch_routes_every_method_on_both_paths() {
        let (root, table) = table();
        root.resource("things", &Everything);
        assert_eq!(table.read().routes().len(), STANDARD_METHODS.len() * 2);
    }

    #[test]
    fn default_id_is_last_segment() {
        assert_eq!(default_id("admin/accounts/"), "accounts");
        assert_eq!(default_id("users"), "users");
    }
}
