use aws_sdk_ecr::error::BuildError;
use aws_sdk_ecr::types;
use ecr_driver::replication::{
    ReplicationConfiguration, ReplicationDestination, ReplicationRule, RepositoryFilter,
    RepositoryFilterType,
};

pub(crate) fn to_service(
    configuration: &ReplicationConfiguration,
) -> Result<types::ReplicationConfiguration, BuildError> {
    let mut rules = Vec::with_capacity(configuration.rules.len());

    for rule in &configuration.rules {
        let mut builder = types::ReplicationRule::builder();

        for destination in &rule.destinations {
            builder = builder.destinations(
                types::ReplicationDestination::builder()
                    .region(&destination.region)
                    .registry_id(&destination.registry_id)
                    .build()?,
            );
        }

        for filter in &rule.repository_filters {
            let filter_type = match filter.filter_type {
                RepositoryFilterType::PrefixMatch => types::RepositoryFilterType::PrefixMatch,
            };
            builder = builder.repository_filters(
                types::RepositoryFilter::builder()
                    .filter(&filter.filter)
                    .filter_type(filter_type)
                    .build()?,
            );
        }

        rules.push(builder.build()?);
    }

    types::ReplicationConfiguration::builder()
        .set_rules(Some(rules))
        .build()
}

pub(crate) fn from_service(configuration: &types::ReplicationConfiguration) -> ReplicationConfiguration {
    let rules = configuration
        .rules()
        .iter()
        .map(|rule| ReplicationRule {
            destinations: rule
                .destinations()
                .iter()
                .map(|destination| {
                    ReplicationDestination::new(destination.region(), destination.registry_id())
                })
                .collect(),
            repository_filters: rule
                .repository_filters()
                .iter()
                .map(|filter| RepositoryFilter::prefix(filter.filter()))
                .collect(),
        })
        .collect();

    ReplicationConfiguration { rules }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rules_convert_to_service_types() {
        let configuration = ReplicationConfiguration::from(vec![ReplicationRule::new(vec![
            ReplicationDestination::new("us-west-2", "222222222222"),
        ])
        .with_filter(RepositoryFilter::prefix("app-"))]);

        let service = to_service(&configuration).unwrap();
        let rule = &service.rules()[0];
        assert_eq!(rule.destinations()[0].region(), "us-west-2");
        assert_eq!(rule.destinations()[0].registry_id(), "222222222222");
        assert_eq!(rule.repository_filters()[0].filter(), "app-");
        assert_eq!(
            rule.repository_filters()[0].filter_type(),
            &types::RepositoryFilterType::PrefixMatch
        );

        assert_eq!(from_service(&service), configuration);
    }

    #[test]
    fn empty_configuration_clears_rules() {
        let service = to_service(&ReplicationConfiguration::default()).unwrap();
        assert!(service.rules().is_empty());
    }
}
