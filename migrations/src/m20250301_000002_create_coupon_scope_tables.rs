use sea_orm_migration::prelude::*;

use crate::m20250301_000001_create_coupons_table::Coupons;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CouponProducts::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(CouponProducts::CouponId).uuid().not_null())
                    .col(
                        ColumnDef::new(CouponProducts::ProductId)
                            .big_integer()
                            .not_null(),
                    )
                    .primary_key(
                        Index::create()
                            .col(CouponProducts::CouponId)
                            .col(CouponProducts::ProductId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_coupon_products_coupon_id")
                            .from(CouponProducts::Table, CouponProducts::CouponId)
                            .to(Coupons::Table, Coupons::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(CouponCategories::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CouponCategories::CouponId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CouponCategories::CategoryId)
                            .big_integer()
                            .not_null(),
                    )
                    .primary_key(
                        Index::create()
                            .col(CouponCategories::CouponId)
                            .col(CouponCategories::CategoryId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_coupon_categories_coupon_id")
                            .from(CouponCategories::Table, CouponCategories::CouponId)
                            .to(Coupons::Table, Coupons::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(CouponCategories::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(CouponProducts::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum CouponProducts {
    Table,
    CouponId,
    ProductId,
}

#[derive(DeriveIden)]
enum CouponCategories {
    Table,
    CouponId,
    CategoryId,
}
