use std::sync::Arc;

use fleetrun_core::{Instance, Labels, ProviderTag};
use tracing::{debug, warn};

use crate::features::aws::repo::{Ec2Instance, Ec2Repository};
use crate::{ProviderError, Result};

pub struct AwsInventoryService {
    repo: Arc<dyn Ec2Repository>,
}

impl AwsInventoryService {
    pub fn new(repo: Arc<dyn Ec2Repository>) -> Self {
        Self { repo }
    }

    pub async fn list_instances(&self) -> Result<Vec<Instance>> {
        let mut instances = Vec::new();
        let mut next_token: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let page = self.repo.describe_instances(next_token.as_deref()).await?;
            pages += 1;

            for raw in page.instances {
                match normalize(raw) {
                    Ok(instance) => instances.push(instance),
                    Err(error) => warn!(error = %error, "Skipping EC2 instance without an id"),
                }
            }

            match page.next_token {
                Some(token) if next_token.as_deref() == Some(token.as_str()) => {
                    return Err(ProviderError::Decode {
                        provider: ProviderTag::Aws,
                        message: "pagination token did not advance".to_string(),
                    });
                }
                Some(token) => next_token = Some(token),
                None => break,
            }
        }

        debug!(pages, count = instances.len(), "Listed EC2 instances");
        Ok(instances)
    }
}

pub(crate) fn normalize(raw: Ec2Instance) -> fleetrun_core::Result<Instance> {
    let labels: Labels = raw.tags.into_iter().collect();
    Instance::new(
        raw.instance_id,
        raw.private_ip_address.unwrap_or_default(),
        raw.public_ip_address.unwrap_or_default(),
        labels,
        ProviderTag::Aws,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::aws::repo::DescribeInstancesPage;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::sync::Mutex;

    /// Serves canned pages and records the tokens it was asked for.
    struct PagedRepo {
        pages: Vec<DescribeInstancesPage>,
        requested: Mutex<Vec<Option<String>>>,
    }

    impl PagedRepo {
        fn new(pages: Vec<DescribeInstancesPage>) -> Self {
            Self {
                pages,
                requested: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Ec2Repository for PagedRepo {
        async fn describe_instances(
            &self,
            next_token: Option<&str>,
        ) -> Result<DescribeInstancesPage> {
            let mut requested = self.requested.lock().unwrap();
            requested.push(next_token.map(str::to_string));
            Ok(self.pages[requested.len() - 1].clone())
        }
    }

    struct FailingRepo;

    #[async_trait]
    impl Ec2Repository for FailingRepo {
        async fn describe_instances(
            &self,
            _next_token: Option<&str>,
        ) -> Result<DescribeInstancesPage> {
            Err(ProviderError::Api {
                provider: ProviderTag::Aws,
                status: 403,
                body: "UnauthorizedOperation".to_string(),
            })
        }
    }

    fn ec2(id: &str, private: &str, tags: &[(&str, &str)]) -> Ec2Instance {
        Ec2Instance {
            instance_id: id.to_string(),
            private_ip_address: Some(private.to_string()),
            public_ip_address: None,
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_list_instances_follows_tokens() {
        let repo = Arc::new(PagedRepo::new(vec![
            DescribeInstancesPage {
                instances: vec![ec2("i-1", "10.0.0.1", &[("env", "prod")])],
                next_token: Some("page-2".to_string()),
            },
            DescribeInstancesPage {
                instances: vec![ec2("i-2", "10.0.0.2", &[]), ec2("i-3", "10.0.0.3", &[])],
                next_token: Some("page-3".to_string()),
            },
            DescribeInstancesPage {
                instances: vec![ec2("i-4", "10.0.0.4", &[])],
                next_token: None,
            },
        ]));
        let service = AwsInventoryService::new(repo.clone());

        let instances = service.list_instances().await.unwrap();

        let names: Vec<&str> = instances.iter().map(Instance::name).collect();
        assert_eq!(names, vec!["i-1", "i-2", "i-3", "i-4"]);
        assert_eq!(instances[0].labels().get("env").map(String::as_str), Some("prod"));
        assert!(instances.iter().all(|i| i.provider() == ProviderTag::Aws));
        assert_eq!(
            *repo.requested.lock().unwrap(),
            vec![None, Some("page-2".to_string()), Some("page-3".to_string())]
        );
    }

    #[tokio::test]
    async fn test_records_without_id_are_skipped() {
        let repo = Arc::new(PagedRepo::new(vec![DescribeInstancesPage {
            instances: vec![ec2("", "10.0.0.1", &[]), ec2("i-2", "10.0.0.2", &[])],
            next_token: None,
        }]));
        let service = AwsInventoryService::new(repo);

        let instances = service.list_instances().await.unwrap();
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].name(), "i-2");
    }

    #[tokio::test]
    async fn test_repeated_token_is_an_error() {
        let page = DescribeInstancesPage {
            instances: vec![],
            next_token: Some("same".to_string()),
        };
        let repo = Arc::new(PagedRepo::new(vec![page.clone(), page]));
        let service = AwsInventoryService::new(repo);

        assert!(matches!(
            service.list_instances().await,
            Err(ProviderError::Decode { .. })
        ));
    }

    #[tokio::test]
    async fn test_repository_error_propagates() {
        let service = AwsInventoryService::new(Arc::new(FailingRepo));
        let err = service.list_instances().await.unwrap_err();
        assert!(matches!(err, ProviderError::Api { status: 403, .. }));
        assert_eq!(err.provider(), ProviderTag::Aws);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn property_normalization_preserves_tags(
            tags in prop::collection::btree_map("[A-Za-z:_-]{1,16}", ".{0,32}", 0..10),
        ) {
            let raw = Ec2Instance {
                instance_id: "i-0abc".to_string(),
                private_ip_address: Some("10.1.2.3".to_string()),
                public_ip_address: None,
                tags: tags.clone().into_iter().collect(),
            };

            let instance = normalize(raw).unwrap();
            prop_assert_eq!(instance.labels(), &tags);
        }
    }
}
