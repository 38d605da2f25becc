use shell_core::{query_scalar, Session, SessionError, Version};

/// A session to the target instance plus its identity.
pub struct Instance {
    session: Box<dyn Session>,
    uuid: String,
    descr: String,
}

impl Instance {
    /// Wraps `session`, reading the server UUID from it.
    pub async fn new(mut session: Box<dyn Session>) -> Result<Self, SessionError> {
        let uuid = query_scalar::<String>(session.as_mut(), "SELECT @@server_uuid")
            .await?
            .unwrap_or_default();
        let descr = session.describe();
        Ok(Self {
            session,
            uuid,
            descr,
        })
    }

    pub fn from_parts(session: Box<dyn Session>, uuid: impl Into<String>) -> Self {
        let descr = session.describe();
        Self {
            session,
            uuid: uuid.into(),
            descr,
        }
    }

    pub fn session(&mut self) -> &mut dyn Session {
        self.session.as_mut()
    }

    pub fn version(&self) -> Version {
        self.session.server_version()
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn descr(&self) -> &str {
        &self.descr
    }

    pub fn is_open(&self) -> bool {
        self.session.is_open()
    }

    pub fn into_session(self) -> Box<dyn Session> {
        self.session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shell_core::testing::{result, Script, DEFAULT_TEST_VERSION};

    #[tokio::test]
    async fn test_reads_server_uuid() {
        let script = Script::new();
        script.on("@@server_uuid", result(&["uuid"], vec![vec!["3e1f-aa"]]));
        let instance = Instance::new(script.session().boxed()).await.unwrap();
        assert_eq!(instance.uuid(), "3e1f-aa");
        assert_eq!(instance.version(), DEFAULT_TEST_VERSION);
        assert!(instance.is_open());
    }
}
