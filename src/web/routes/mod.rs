pub mod health_routes;
