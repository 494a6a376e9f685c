//! 路由集成测试共用的宿主桩。

use std::collections::BTreeMap;
use std::sync::Arc;

use reactor_core::engine::{Engine, EngineLookup};
use reactor_core::{ContentHandler, HostServices, ReactorError, codes, content_handler};

/// 不提供任何引擎的宿主。
pub struct NullHost;

impl EngineLookup for NullHost {
    fn engine_dyn(&self, name: &str) -> Result<Arc<dyn Engine>, ReactorError> {
        Err(ReactorError::new(
            codes::ENGINE_NOT_FOUND,
            format!("no engine `{name}`"),
        ))
    }

    fn is_engine_ready(&self, _: &str) -> bool {
        false
    }
}

impl HostServices for NullHost {
    fn add_content_handler(
        &self,
        _: &str,
        _: &str,
        _: ContentHandler,
        _: bool,
    ) -> Result<(), ReactorError> {
        Ok(())
    }

    fn uri_map(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    fn is_shutting_down(&self) -> bool {
        false
    }
}

/// 以固定文本作答的处理函数。
#[allow(dead_code)]
pub fn reply(text: &'static str) -> ContentHandler {
    content_handler(move |_, _, response| {
        response.set_body(text);
        Ok(())
    })
}
