pub mod cookies;
pub mod widget_routes;
pub mod ws_routes;
