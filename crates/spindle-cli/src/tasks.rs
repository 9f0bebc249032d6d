//! Demo tasks served by the binary.
//!
//! - `demo.math.add.v1`: x + y
//! - `demo.math.slow_double.v1`: x * 2, after a cancellable 3 s sleep

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use spindle_core::typed::RegistryError;
use spindle_core::{AppBuilder, Handler, HandlerError, JobContext, Task};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Add {
    pub x: i64,
    pub y: i64,
}

impl Task for Add {
    const TYPE: &'static str = "demo.math.add.v1";
    type Output = i64;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlowDouble {
    pub x: i64,
}

impl Task for SlowDouble {
    const TYPE: &'static str = "demo.math.slow_double.v1";
    type Output = i64;
}

pub struct AddHandler;

#[async_trait]
impl Handler<Add> for AddHandler {
    async fn handle(&self, _ctx: &JobContext, task: Add) -> Result<i64, HandlerError> {
        task.x
            .checked_add(task.y)
            .ok_or_else(|| HandlerError::permanent("integer overflow"))
    }
}

pub struct SlowDoubleHandler {
    pub delay: Duration,
}

impl Default for SlowDoubleHandler {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(3),
        }
    }
}

#[async_trait]
impl Handler<SlowDouble> for SlowDoubleHandler {
    async fn handle(&self, ctx: &JobContext, task: SlowDouble) -> Result<i64, HandlerError> {
        ctx.sleep(self.delay).await?;
        task.x
            .checked_mul(2)
            .ok_or_else(|| HandlerError::permanent("integer overflow"))
    }
}

/// Builder with both demo tasks registered and expected.
pub fn builder(slow_delay: Duration) -> Result<AppBuilder, RegistryError> {
    Ok(AppBuilder::new()
        .register::<Add, _>(AddHandler)?
        .register::<SlowDouble, _>(SlowDoubleHandler { delay: slow_delay })?
        .expect_tasks(&[Add::TYPE, SlowDouble::TYPE]))
}
