//! BYOK Gateway - multi-tenant, OpenAI-compatible LLM proxy
//!
//! Tenants call one endpoint with their own bearer token; the gateway picks
//! the upstream provider from the requested model, decrypts the tenant's
//! stored key for that provider and forwards the request unchanged:
//! - Tenant authentication (`middleware::auth`)
//! - Envelope encryption of provider keys (`middleware::vault`)
//! - Provider catalog and model routing (`providers`)
//! - Buffered and streaming passthrough (`proxy`)
//!
//! Operator actions (tenants, credentials, KEK rotation) live in `admin` and
//! are driven from the `byokgate` CLI.

pub mod admin;
pub mod config;
pub mod error;
pub mod middleware;
pub mod providers;
pub mod proxy;
