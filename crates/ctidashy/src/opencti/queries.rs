//! GraphQL documents sent to OpenCTI.

pub const ABOUT: &str = r"
query About {
    about {
        version
    }
}
";

pub const SEARCH: &str = r"
query Search($search: String, $first: Int) {
    stixCoreObjects(search: $search, first: $first) {
        edges {
            node {
                id
                entity_type
                created_at
                updated_at
                createdBy {
                    name
                }
                objectMarking {
                    definition
                }
                objectLabel {
                    value
                }
                ... on StixDomainObject {
                    confidence
                }
                ... on Report {
                    name
                    description
                }
                ... on Organization {
                    name
                    description
                }
                ... on Indicator {
                    name
                    description
                }
                ... on Malware {
                    name
                    description
                }
                ... on ThreatActor {
                    name
                    description
                }
            }
        }
    }
}
";

pub const USERS: &str = r"
query Users($search: String, $count: Int!, $orderBy: UsersOrdering, $orderMode: OrderingMode) {
    users(search: $search, first: $count, orderBy: $orderBy, orderMode: $orderMode) {
        edges {
            node {
                id
                name
                user_email
                firstname
                lastname
                api_token
                external
                otp_activated
                created_at
            }
        }
    }
}
";

pub const USER_GROUPS: &str = r"
query UserGroups($id: String!) {
    user(id: $id) {
        id
        groups {
            edges {
                node {
                    id
                    name
                }
            }
        }
    }
}
";

pub const USER_ADD: &str = r"
mutation UserAdd($input: UserAddInput!) {
    userAdd(input: $input) {
        id
    }
}
";

pub const USER_DELETE: &str = r"
mutation UserDelete($id: ID!) {
    userEdit(id: $id) {
        delete
    }
}
";

pub const GROUP_MEMBER_ADD: &str = r"
mutation GroupMemberAdd($id: ID!, $input: InternalRelationshipAddInput!) {
    groupEdit(id: $id) {
        relationAdd(input: $input) {
            id
        }
    }
}
";
