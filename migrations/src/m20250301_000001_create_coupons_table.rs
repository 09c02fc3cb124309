use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Coupons::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Coupons::Id).uuid().primary_key().not_null())
                    .col(ColumnDef::new(Coupons::Name).string().not_null())
                    .col(
                        ColumnDef::new(Coupons::Code)
                            .string_len(64)
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Coupons::DiscountType).string_len(32).not_null())
                    .col(ColumnDef::new(Coupons::DiscountValue).decimal_len(19, 4).null())
                    .col(
                        ColumnDef::new(Coupons::ExpiryDate)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Coupons::CouponType)
                            .string_len(32)
                            .not_null()
                            .default("USER"),
                    )
                    .col(ColumnDef::new(Coupons::OwnerId).uuid().null())
                    .col(
                        ColumnDef::new(Coupons::MinPurchaseAmount)
                            .decimal_len(19, 4)
                            .null(),
                    )
                    .col(ColumnDef::new(Coupons::UsageLimit).integer().null())
                    .col(
                        ColumnDef::new(Coupons::TimesUsed)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Coupons::FirstTimeOnly)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Coupons::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Coupons::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_coupons_owner_id")
                    .table(Coupons::Table)
                    .col(Coupons::OwnerId)
                    .if_not_exists()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Coupons::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Coupons {
    Table,
    Id,
    Name,
    Code,
    DiscountType,
    DiscountValue,
    ExpiryDate,
    CouponType,
    OwnerId,
    MinPurchaseAmount,
    UsageLimit,
    TimesUsed,
    FirstTimeOnly,
    CreatedAt,
    UpdatedAt,
}
