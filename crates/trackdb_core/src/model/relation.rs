//! Relationship metadata and delete-policy model.
//!
//! # Responsibility
//! - Describe every navigable relationship between entity kinds.
//! - Hold the explicit delete policy of each ownership relationship.
//!
//! # Invariants
//! - Ownership relationships (owner -> exclusively owned dependents) must
//!   each carry exactly one explicit [`DeletePolicy`]; there is no default.
//! - Shared (many-to-many) relationships never delete the shared side.

use crate::error::ValidationError;
use crate::model::value::EntityKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// Every navigable relationship, named `<Source><Navigation>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    /// Author -> articles written by the author.
    AuthorArticles,
    /// Article -> its author.
    ArticleAuthor,
    /// Article -> owned comments.
    ArticleComments,
    /// Comment -> owning article.
    CommentArticle,
    /// Article -> shared tags.
    ArticleTags,
    /// Tag -> articles carrying the tag.
    TagArticles,
}

/// Whether a navigation yields one entity or a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    One,
    Many,
}

/// How two tables are connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    /// Target rows carry a foreign key to the source (`target.column = source.id`).
    TargetColumn(&'static str),
    /// Source rows carry a foreign key to the target (`target.id = source.column`).
    SourceColumn(&'static str),
    /// Association table pairing source and target ids.
    Association {
        table: &'static str,
        source_column: &'static str,
        target_column: &'static str,
    },
}

impl Relation {
    pub const ALL: [Relation; 6] = [
        Self::AuthorArticles,
        Self::ArticleAuthor,
        Self::ArticleComments,
        Self::CommentArticle,
        Self::ArticleTags,
        Self::TagArticles,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::AuthorArticles => "author.articles",
            Self::ArticleAuthor => "article.author",
            Self::ArticleComments => "article.comments",
            Self::CommentArticle => "comment.article",
            Self::ArticleTags => "article.tags",
            Self::TagArticles => "tag.articles",
        }
    }

    pub fn source(self) -> EntityKind {
        match self {
            Self::AuthorArticles => EntityKind::Author,
            Self::ArticleAuthor | Self::ArticleComments | Self::ArticleTags => EntityKind::Article,
            Self::CommentArticle => EntityKind::Comment,
            Self::TagArticles => EntityKind::Tag,
        }
    }

    pub fn target(self) -> EntityKind {
        match self {
            Self::AuthorArticles | Self::CommentArticle | Self::TagArticles => EntityKind::Article,
            Self::ArticleAuthor => EntityKind::Author,
            Self::ArticleComments => EntityKind::Comment,
            Self::ArticleTags => EntityKind::Tag,
        }
    }

    pub fn cardinality(self) -> Cardinality {
        match self {
            Self::ArticleAuthor | Self::CommentArticle => Cardinality::One,
            _ => Cardinality::Many,
        }
    }

    pub fn link(self) -> Link {
        match self {
            Self::AuthorArticles => Link::TargetColumn("author_id"),
            Self::ArticleAuthor => Link::SourceColumn("author_id"),
            Self::ArticleComments => Link::TargetColumn("article_id"),
            Self::CommentArticle => Link::SourceColumn("article_id"),
            Self::ArticleTags => Link::Association {
                table: "article_tags",
                source_column: "article_id",
                target_column: "tag_id",
            },
            Self::TagArticles => Link::Association {
                table: "article_tags",
                source_column: "tag_id",
                target_column: "article_id",
            },
        }
    }

    /// The same relationship navigated from the other side.
    pub fn inverse(self) -> Relation {
        match self {
            Self::AuthorArticles => Self::ArticleAuthor,
            Self::ArticleAuthor => Self::AuthorArticles,
            Self::ArticleComments => Self::CommentArticle,
            Self::CommentArticle => Self::ArticleComments,
            Self::ArticleTags => Self::TagArticles,
            Self::TagArticles => Self::ArticleTags,
        }
    }

    /// Owner -> dependent relationships subject to a delete policy.
    pub fn is_ownership(self) -> bool {
        matches!(self, Self::AuthorArticles | Self::ArticleComments)
    }

    /// Collections whose membership is persisted from the source side:
    /// owned comments (orphan removal) and tag associations.
    pub fn is_tracked_collection(self) -> bool {
        matches!(self, Self::ArticleComments | Self::ArticleTags)
    }

    /// Relationships navigable from `kind`.
    pub fn from_kind(kind: EntityKind) -> impl Iterator<Item = Relation> {
        Self::ALL
            .into_iter()
            .filter(move |relation| relation.source() == kind)
    }
}

impl Display for Relation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// What happens to dependents when their owner is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletePolicy {
    /// Commit fails while any dependent still references the owner.
    Restrict,
    /// Dependents are deleted with the owner, recursively.
    Cascade,
}

/// Entity-graph model: the delete policy of every ownership relationship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Model {
    policies: BTreeMap<Relation, DeletePolicy>,
}

impl Model {
    pub fn builder() -> ModelBuilder {
        ModelBuilder::default()
    }

    /// Policies of the blog schema: authors cannot be deleted while they
    /// still own articles, comments go away with their article.
    pub fn blog() -> Self {
        Self {
            policies: BTreeMap::from([
                (Relation::AuthorArticles, DeletePolicy::Restrict),
                (Relation::ArticleComments, DeletePolicy::Cascade),
            ]),
        }
    }

    pub fn policy(&self, relation: Relation) -> Option<DeletePolicy> {
        self.policies.get(&relation).copied()
    }

    /// Ownership relationships whose owner side is `kind`.
    pub fn ownerships(&self, kind: EntityKind) -> impl Iterator<Item = (Relation, DeletePolicy)> + '_ {
        self.policies
            .iter()
            .filter(move |(relation, _)| relation.source() == kind)
            .map(|(relation, policy)| (*relation, *policy))
    }
}

impl Default for Model {
    fn default() -> Self {
        Self::blog()
    }
}

/// Builder requiring one explicit policy per ownership relationship.
#[derive(Debug, Clone, Default)]
pub struct ModelBuilder {
    policies: BTreeMap<Relation, DeletePolicy>,
}

impl ModelBuilder {
    pub fn on_delete(mut self, relation: Relation, policy: DeletePolicy) -> Self {
        self.policies.insert(relation, policy);
        self
    }

    /// Builds the model.
    ///
    /// # Errors
    /// - `NotAnOwnership` when a policy targets a shared or reference relationship.
    /// - `MissingDeletePolicy` when an ownership relationship was left unconfigured.
    pub fn build(self) -> Result<Model, ValidationError> {
        if let Some(relation) = self.policies.keys().find(|relation| !relation.is_ownership()) {
            return Err(ValidationError::NotAnOwnership(*relation));
        }
        if let Some(relation) = Relation::ALL
            .into_iter()
            .filter(|relation| relation.is_ownership())
            .find(|relation| !self.policies.contains_key(relation))
        {
            return Err(ValidationError::MissingDeletePolicy(relation));
        }

        Ok(Model {
            policies: self.policies,
        })
    }
}
