//! `base`: fetches the base route of the API.
//!
//! The answer is not checked, any response counts as a success. The test measures the round trip
//! overhead of the registry and has no practical utility beyond that.

use crate::client::{ProtocolClient, Request};
use crate::config::{TestConfig, TestType};
use crate::error::Result;
use crate::runners::Registry;
use crate::Runner;
use reqwest::Method;

pub struct BaseTest;

impl BaseTest {
    pub fn create(_cfg: &TestConfig) -> Result<Box<dyn Runner>> {
        Ok(Box::new(Self))
    }
}

impl Runner for BaseTest {
    fn run(&mut self, client: &dyn ProtocolClient) -> Result<u64> {
        let response = client.execute(Request::new(Method::GET, "/v2/"))?;
        Ok(response.body.len() as u64)
    }
}

pub(crate) fn register(registry: &mut Registry) {
    registry.register(TestType::Base, BaseTest::create);
}
